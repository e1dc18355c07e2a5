//! Bearer tokens for the Drive API.
//!
//! A [`TokenSource`] is asked for a token on every request, so long-running
//! processes keep working past the lifetime of any single access token.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{ConfigError, Credentials};
use crate::drive::DriveError;

/// OAuth scope needed to watch files and stop channels.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, DriveError>;
}

/// Always hands out the same token.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, DriveError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenFileContents {
    access_token: String,
}

/// Re-reads `{"access_token": ...}` from disk on every call, so an external
/// refresher can rotate the token underneath a running process.
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenSource for TokenFile {
    async fn access_token(&self) -> Result<String, DriveError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            DriveError::Auth(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let contents: TokenFileContents = serde_json::from_slice(&data).map_err(|e| {
            DriveError::Auth(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        let token = contents.access_token.trim();
        if token.is_empty() {
            return Err(DriveError::Auth(format!(
                "{} contains an empty access_token",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}

/// Service-account key authenticator. Tokens are minted from the key and
/// cached by `gcp_auth` until shortly before they expire.
pub struct ServiceAccount {
    account: gcp_auth::CustomServiceAccount,
}

impl ServiceAccount {
    pub fn from_json(key_json: &str) -> Result<Self, gcp_auth::Error> {
        Ok(Self {
            account: gcp_auth::CustomServiceAccount::from_json(key_json)?,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccount {
    async fn access_token(&self) -> Result<String, DriveError> {
        use gcp_auth::TokenProvider;

        let token = self
            .account
            .token(&[DRIVE_SCOPE])
            .await
            .map_err(|e| DriveError::Auth(e.to_string()))?;
        Ok(token.as_str().to_string())
    }
}

/// Build the token source matching the kind of credentials file given.
pub fn token_source(credentials: Credentials) -> Result<Arc<dyn TokenSource>, ConfigError> {
    match credentials {
        Credentials::ServiceAccount { path, key_json } => {
            let account = ServiceAccount::from_json(&key_json)
                .map_err(|e| ConfigError::ServiceAccount(path, e.to_string()))?;
            tracing::info!("using service-account credentials");
            Ok(Arc::new(account))
        }
        Credentials::AccessTokenFile(path) => {
            tracing::info!(path = %path.display(), "using access token file, re-read per request");
            Ok(Arc::new(TokenFile::new(path)))
        }
    }
}
