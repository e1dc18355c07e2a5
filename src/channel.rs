use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One outstanding watch channel against the Drive push-notification API.
///
/// Serialized field names are the on-disk contract of the state file:
/// `{id, resource_id, file_id, expiration}` plus an optional `token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id generated locally at creation time.
    pub id: String,
    /// Opaque handle returned by Drive; required to stop the channel.
    pub resource_id: String,
    /// The watched file (the caller-supplied tracked resource).
    #[serde(rename = "file_id")]
    pub tracked_resource: String,
    /// Absolute expiry as reported by Drive.
    #[serde(rename = "expiration")]
    pub expires_at: DateTime<Utc>,
    /// Per-channel secret echoed back by Drive in `X-Goog-Channel-Token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ChannelInfo {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry; negative once lapsed.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }
}

/// Generate a fresh, locally unique channel id.
pub fn new_channel_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate the per-channel secret sent along with the subscription.
pub fn new_channel_token() -> String {
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
