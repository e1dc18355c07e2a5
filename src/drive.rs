//! Google Drive v3 push-notification API: creating and stopping watch channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::TokenSource;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("drive API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response from drive API: {0}")]
    InvalidResponse(String),

    #[error("failed to obtain access token: {0}")]
    Auth(String),
}

/// Parameters for a new watch channel.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    pub channel_id: String,
    pub file_id: String,
    pub address: String,
    pub token: String,
    pub expiration: DateTime<Utc>,
}

/// What Drive reports back for a created channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub resource_id: String,
    /// Expiry granted by Drive; may be earlier than requested.
    pub expiration: DateTime<Utc>,
}

/// The two remote calls the channel lifecycle depends on.
#[async_trait]
pub trait ChannelApi: Send + Sync {
    async fn watch(&self, request: WatchRequest) -> Result<WatchResponse, DriveError>;

    async fn stop(&self, channel_id: &str, resource_id: &str) -> Result<(), DriveError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelBody<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    address: &'a str,
    token: &'a str,
    expiration: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopBody<'a> {
    id: &'a str,
    resource_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    resource_id: Option<String>,
    expiration: Option<String>,
}

/// HTTP client for the Drive API. A bearer token is fetched from the
/// [`TokenSource`] for every request.
pub struct DriveClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<dyn TokenSource>,
}

impl DriveClient {
    pub fn new(
        api_base: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, DriveError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, DriveError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(DriveError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChannelApi for DriveClient {
    async fn watch(&self, request: WatchRequest) -> Result<WatchResponse, DriveError> {
        let url = format!("{}/files/{}/watch", self.api_base, request.file_id);
        let body = ChannelBody {
            id: &request.channel_id,
            kind: "web_hook",
            address: &request.address,
            token: &request.token,
            expiration: request.expiration.timestamp_millis().to_string(),
        };

        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let resource: ChannelResource = Self::check(resp).await?.json().await?;

        let resource_id = resource
            .resource_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DriveError::InvalidResponse("missing resourceId".into()))?;
        let expiration = resource
            .expiration
            .as_deref()
            .and_then(parse_millis)
            .unwrap_or(request.expiration);

        Ok(WatchResponse {
            resource_id,
            expiration,
        })
    }

    async fn stop(&self, channel_id: &str, resource_id: &str) -> Result<(), DriveError> {
        let url = format!("{}/channels/stop", self.api_base);
        let token = self.tokens.access_token().await?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&StopBody {
                id: channel_id,
                resource_id,
            })
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}

/// Parse a Unix-milliseconds timestamp as Drive encodes it (a decimal string).
pub fn parse_millis(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
