use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::protocol::{login_body, refresh_body, LOGIN_PATH, REFRESH_PATH, USER_AGENT};
use crate::{Error, Result};

/// Tokens refreshed one minute before the server-reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Bearer credentials for the cloud session. The host application persists
/// these (via `on_tokens`) and may hand them back to the builder on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub auth_token: Option<String>,
    pub user_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl AuthTokens {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Full credential login. Fails hard on missing tokens in the response since
/// writes would be impossible without them.
pub(crate) async fn login(
    http: &reqwest::Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<AuthTokens> {
    let url = format!("{base_url}{LOGIN_PATH}");
    debug!(url = %url, email = %email, "logging in");
    let response = http
        .post(&url)
        .header("User-Agent", USER_AGENT)
        .json(&login_body(email, password))
        .send()
        .await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    if status != 200 {
        return Err(Error::Auth(format!("login failed ({status}): {body}")));
    }
    let data: Value =
        serde_json::from_str(&body).map_err(|e| Error::Auth(format!("bad login response: {e}")))?;
    let tokens = parse_tokens(&data, None)?;
    if tokens.auth_token.is_none() {
        return Err(Error::Auth("No authentication_token received".to_string()));
    }
    Ok(tokens)
}

/// Exchange the stored refresh token for a fresh bearer token. The response
/// may omit `RefreshToken`; the prior value is kept in that case.
pub(crate) async fn refresh(
    http: &reqwest::Client,
    base_url: &str,
    email: &str,
    prior: &AuthTokens,
) -> Result<AuthTokens> {
    let refresh_token = prior
        .refresh_token
        .as_deref()
        .ok_or(Error::NotAuthenticated)?;
    let url = format!("{base_url}{REFRESH_PATH}");
    debug!(url = %url, email = %email, "refreshing token");
    let response = http
        .post(&url)
        .header("User-Agent", USER_AGENT)
        .json(&refresh_body(email, refresh_token))
        .send()
        .await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    if status != 200 {
        return Err(Error::Auth(format!("refresh failed ({status}): {body}")));
    }
    let data: Value = serde_json::from_str(&body)
        .map_err(|e| Error::Auth(format!("bad refresh response: {e}")))?;
    parse_tokens(&data, prior.refresh_token.clone())
}

fn parse_tokens(data: &Value, prior_refresh: Option<String>) -> Result<AuthTokens> {
    let oauth = data.get("userPoolOAuth").unwrap_or(&Value::Null);
    let id_token = oauth
        .get("IdToken")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Auth("No userPoolOAuth.IdToken received".to_string()))?
        .to_string();
    let refresh_token = oauth
        .get("RefreshToken")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or(prior_refresh);
    let expires_in = oauth
        .get("ExpiresIn")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_EXPIRES_IN);
    Ok(AuthTokens {
        id_token,
        refresh_token,
        auth_token: data
            .get("authentication_token")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        user_id: data
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        expires_at: Utc::now() + ChronoDuration::seconds(expires_in - EXPIRY_MARGIN_SECS),
    })
}
