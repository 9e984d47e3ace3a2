use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::core::error::TokenError;
use crate::core::model::Credential;
use crate::core::services::TokenProvider;

/// Value the token URL carries until someone configures a real endpoint
pub const PLACEHOLDER_TOKEN_URL: &str = "YOUR TOKEN SERVER URL";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    secret: Option<String>,
}

/// Fetches connection tokens from a merchant backend over HTTP.
///
/// The endpoint answers a GET with `{"secret": "..."}`. A new token is
/// requested on every call.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    url: String,
    http: reqwest::Client,
}

impl HttpTokenProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("reader-cycler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TokenError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn is_placeholder(&self) -> bool {
        let url = self.url.trim();
        url.is_empty() || url == PLACEHOLDER_TOKEN_URL
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<Credential, TokenError> {
        if self.is_placeholder() {
            return Err(TokenError::Misconfigured(self.url.clone()));
        }

        log::debug!("Fetching connection token from {}", self.url);
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TokenError::Status(status.as_u16()));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|_| TokenError::MalformedResponse)?;

        parse_secret(body)
    }
}

fn parse_secret(body: TokenResponse) -> Result<Credential, TokenError> {
    match body.secret {
        Some(secret) if !secret.is_empty() => Ok(Credential::new(secret)),
        _ => Err(TokenError::MalformedResponse),
    }
}

/// Hands out the same secret every time; for offline simulated runs
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    secret: String,
}

impl StaticTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<Credential, TokenError> {
        Ok(Credential::new(self.secret.clone()))
    }
}
