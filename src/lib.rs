mod auth;
mod client;
mod cooldown;
mod error;
mod protocol;
mod reconcile;
mod refresh;
mod throttle;
mod tuning;
mod types;
mod writer;

pub use auth::AuthTokens;
pub use client::{ExoClient, ExoClientBuilder};
pub use error::{Error, Result};
pub use tuning::Tuning;
pub use types::*;
