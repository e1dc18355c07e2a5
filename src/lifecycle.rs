//! Channel lifecycle: create, renew, stop, and garbage-collect watch channels.
//!
//! Per channel: `Created -> Active -> {Renewing -> (new Created), Stopped, Expired}`.
//! Expiry is detected lazily, when [`ChannelManager::watch`] or the renewal
//! scheduler next runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::channel::{new_channel_id, new_channel_token, ChannelInfo};
use crate::drive::{ChannelApi, DriveError, WatchRequest};
use crate::registry::ChannelRegistry;

/// Maximum lifetime requested for a channel when none is configured.
pub const DEFAULT_MAX_CHANNEL_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("channel not found: {0}")]
    NotFound(String),

    #[error("failed to watch {resource}: {source}")]
    SubscriptionFailed {
        resource: String,
        #[source]
        source: DriveError,
    },

    #[error("failed to stop channel {channel_id}: {source}")]
    RemoteStopFailed {
        channel_id: String,
        #[source]
        source: DriveError,
    },
}

/// Owns the channel registry and the remote API handle.
///
/// Constructed once at startup and shared (via `Arc`) with the renewal
/// scheduler, the webhook handlers, and the shutdown path.
pub struct ChannelManager {
    registry: ChannelRegistry,
    api: Arc<dyn ChannelApi>,
    webhook_url: String,
    max_duration: Duration,
}

impl ChannelManager {
    pub fn new(registry: ChannelRegistry, api: Arc<dyn ChannelApi>, webhook_url: String) -> Self {
        Self {
            registry,
            api,
            webhook_url,
            max_duration: DEFAULT_MAX_CHANNEL_DURATION,
        }
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Watch `resource`, replacing any channels previously opened for it.
    ///
    /// Retires every known channel for the same resource, drops lapsed
    /// channels for any resource, then opens a fresh channel.
    pub async fn watch(&self, resource: &str) -> Result<ChannelInfo, LifecycleError> {
        self.cleanup_old_channels(resource).await;
        self.cleanup_expired_channels();
        self.create_watch(resource).await
    }

    /// Stop and forget every channel for `resource`. A failed remote stop is
    /// logged; the entry is dropped regardless and left to lapse remotely.
    /// Returns the number of channels removed.
    pub async fn cleanup_old_channels(&self, resource: &str) -> usize {
        let stale = self
            .registry
            .list_where(|info| info.tracked_resource == resource);
        if stale.is_empty() {
            tracing::debug!(%resource, "no old channels to clean up");
            return 0;
        }

        for info in &stale {
            tracing::info!(channel_id = %info.id, expires_at = %info.expires_at, "stopping old channel");
            match self.api.stop(&info.id, &info.resource_id).await {
                Ok(()) => tracing::info!(channel_id = %info.id, "stopped old channel"),
                Err(e) => tracing::warn!(
                    channel_id = %info.id,
                    error = %e,
                    "failed to stop old channel, dropping it anyway"
                ),
            }
        }

        let ids: Vec<&str> = stale.iter().map(|info| info.id.as_str()).collect();
        let removed = self.registry.delete_where(|info| ids.contains(&info.id.as_str()));
        tracing::info!(%resource, count = removed.len(), "cleaned up old channels");
        removed.len()
    }

    /// Drop every channel whose expiry has passed. Returns how many were removed.
    pub fn cleanup_expired_channels(&self) -> usize {
        let now = Utc::now();
        let removed = self.registry.delete_where(|info| info.is_expired_at(now));
        for info in &removed {
            tracing::info!(channel_id = %info.id, expired_at = %info.expires_at, "removed expired channel");
        }
        removed.len()
    }

    /// Open a new channel for `resource` without any cleanup.
    ///
    /// The registry is only touched once Drive has accepted the channel, so a
    /// failed subscription leaves no partial entry behind.
    pub async fn create_watch(&self, resource: &str) -> Result<ChannelInfo, LifecycleError> {
        let channel_id = new_channel_id();
        let token = new_channel_token();
        let requested = Utc::now()
            + chrono::Duration::from_std(self.max_duration)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        tracing::info!(%resource, %channel_id, "creating watch");
        let granted = self
            .api
            .watch(WatchRequest {
                channel_id: channel_id.clone(),
                file_id: resource.to_string(),
                address: self.webhook_url.clone(),
                token: token.clone(),
                expiration: requested,
            })
            .await
            .map_err(|source| LifecycleError::SubscriptionFailed {
                resource: resource.to_string(),
                source,
            })?;

        let info = ChannelInfo {
            id: channel_id,
            resource_id: granted.resource_id,
            tracked_resource: resource.to_string(),
            expires_at: granted.expiration,
            token: Some(token),
        };
        self.registry.put(info.clone());

        tracing::info!(
            channel_id = %info.id,
            resource_id = %info.resource_id,
            expires_at = %info.expires_at,
            "watch created"
        );
        Ok(info)
    }

    /// Stop one channel remotely and forget it.
    ///
    /// If Drive rejects the stop the entry is kept, since the channel may
    /// still be live.
    pub async fn stop(&self, channel_id: &str) -> Result<(), LifecycleError> {
        let info = self
            .registry
            .get(channel_id)
            .ok_or_else(|| LifecycleError::NotFound(channel_id.to_string()))?;

        self.api
            .stop(&info.id, &info.resource_id)
            .await
            .map_err(|source| LifecycleError::RemoteStopFailed {
                channel_id: channel_id.to_string(),
                source,
            })?;

        self.registry.delete(channel_id);
        tracing::info!(%channel_id, "channel stopped");
        Ok(())
    }

    /// Replace `old_channel_id` with a fresh channel for `resource`.
    ///
    /// Only the named channel is superseded; other channels for the same
    /// resource are left alone. The old entry is dropped even when its remote
    /// stop fails, leaving the remote side to let it lapse.
    pub async fn renew(
        &self,
        resource: &str,
        old_channel_id: &str,
    ) -> Result<ChannelInfo, LifecycleError> {
        match self.stop(old_channel_id).await {
            Ok(()) => {}
            Err(LifecycleError::NotFound(_)) => {
                tracing::debug!(channel_id = %old_channel_id, "old channel already gone");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to stop old channel during renewal");
                self.registry.delete(old_channel_id);
            }
        }
        self.create_watch(resource).await
    }

    /// Renew every channel with less than `threshold` left before expiry.
    ///
    /// The due set is a snapshot; channels stopped or renewed concurrently
    /// are tolerated. Returns `(old, new)` id pairs for successful renewals.
    pub async fn renew_expiring(&self, threshold: Duration) -> Vec<(String, String)> {
        let now = Utc::now();
        let threshold =
            chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::hours(4));
        let due = self
            .registry
            .list_where(|info| info.remaining_at(now) < threshold);

        let mut renewed = Vec::with_capacity(due.len());
        for info in due {
            tracing::info!(channel_id = %info.id, expires_at = %info.expires_at, "renewing channel (expires soon)");
            match self.renew(&info.tracked_resource, &info.id).await {
                Ok(new_info) => {
                    tracing::info!(old = %info.id, new = %new_info.id, "channel renewed");
                    renewed.push((info.id, new_info.id));
                }
                Err(e) => {
                    tracing::warn!(channel_id = %info.id, error = %e, "failed to renew channel");
                }
            }
        }
        renewed
    }

    /// Stop every known channel. Individual failures are logged and skipped.
    pub async fn stop_all(&self) {
        let channels = self.registry.list_all();
        tracing::info!(count = channels.len(), "stopping all active channels");

        for info in channels {
            if let Err(e) = self.stop(&info.id).await {
                tracing::warn!(channel_id = %info.id, error = %e, "failed to stop channel");
            }
        }
        tracing::info!("all channels stopped");
    }
}
