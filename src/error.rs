use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Auth(String),
    NotAuthenticated,
    RateLimited(String),
    Api { status: u16, body: String },
    Write { key: String, reason: String },
    UnknownSchedule(String),
    InvalidTime(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Error::NotAuthenticated => write!(f, "not authenticated"),
            Error::RateLimited(msg) => write!(f, "rate limited: {msg}"),
            Error::Api { status, body } => write!(f, "API error {status}: {body}"),
            Error::Write { key, reason } => write!(f, "write failed for {key}: {reason}"),
            Error::UnknownSchedule(key) => write!(f, "unknown schedule: {key}"),
            Error::InvalidTime(value) => write!(f, "invalid time: {value}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
