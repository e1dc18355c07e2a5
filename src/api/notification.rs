use std::fmt;

use axum::http::HeaderMap;

pub const CHANNEL_ID: &str = "x-goog-channel-id";
pub const CHANNEL_TOKEN: &str = "x-goog-channel-token";
pub const CHANNEL_EXPIRATION: &str = "x-goog-channel-expiration";
pub const RESOURCE_ID: &str = "x-goog-resource-id";
pub const RESOURCE_STATE: &str = "x-goog-resource-state";
pub const RESOURCE_URI: &str = "x-goog-resource-uri";
pub const MESSAGE_NUMBER: &str = "x-goog-message-number";

/// `X-Goog-Resource-State` of a push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Handshake sent once when a channel is created.
    Sync,
    Change,
    Update,
    Other(String),
}

impl ResourceState {
    pub fn parse(value: &str) -> Self {
        match value {
            "sync" => Self::Sync,
            "change" => Self::Change,
            "update" => Self::Update,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Sync => "sync",
            Self::Change => "change",
            Self::Update => "update",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Drive push notification, read from the request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel_id: String,
    pub resource_id: String,
    pub resource_state: ResourceState,
    pub resource_uri: Option<String>,
    pub message_number: Option<u64>,
    pub expiration: Option<String>,
    pub token: Option<String>,
}

impl Notification {
    /// Read each `X-Goog-*` header. Missing or non-UTF-8 values come back empty.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            channel_id: header(headers, CHANNEL_ID).unwrap_or_default(),
            resource_id: header(headers, RESOURCE_ID).unwrap_or_default(),
            resource_state: ResourceState::parse(
                &header(headers, RESOURCE_STATE).unwrap_or_default(),
            ),
            resource_uri: header(headers, RESOURCE_URI),
            message_number: header(headers, MESSAGE_NUMBER).and_then(|n| n.trim().parse().ok()),
            expiration: header(headers, CHANNEL_EXPIRATION),
            token: header(headers, CHANNEL_TOKEN),
        }
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
