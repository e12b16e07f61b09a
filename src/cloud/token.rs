use std::sync::OnceLock;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CloudConfig;

use super::AccessToken;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("token response is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("token response has no access_token")]
    MissingToken,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Performs the client-credentials exchange and holds the resulting token.
///
/// The token is written at most once. There is no refresh: once cached, the
/// same token is handed out for the rest of the process lifetime.
pub struct TokenProvider {
    http: reqwest::Client,
    config: CloudConfig,
    token: OnceLock<AccessToken>,
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, config: CloudConfig) -> Self {
        Self {
            http,
            config,
            token: OnceLock::new(),
        }
    }

    /// Exchange the client credentials for a bearer token and cache it.
    ///
    /// Returns the cached token, which is the first one ever obtained.
    pub async fn authenticate(&self) -> Result<AccessToken, AuthError> {
        let url = self.config.token_url();
        debug!("Requesting access token from {}", url);

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(audience) = &self.config.audience {
            form.push(("audience", audience.as_str()));
        }

        let response = self.http.post(&url).form(&form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(AuthError::Status { status, body });
        }

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        let token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .map(AccessToken::new)
            .ok_or(AuthError::MissingToken)?;

        match parsed.expires_in {
            Some(secs) => info!("Obtained access token (expires in {}s, not refreshed)", secs),
            None => info!("Obtained access token"),
        }

        if self.token.get().is_some() {
            warn!("Access token already cached, keeping the existing one");
        }
        Ok(self.token.get_or_init(|| token).clone())
    }

    /// The cached token, if authentication has succeeded.
    pub fn token(&self) -> Option<&AccessToken> {
        self.token.get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.get().is_some()
    }
}
