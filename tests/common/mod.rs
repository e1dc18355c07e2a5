#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use drivewatch::api::{self, AppState};
use drivewatch::change::{ChangeEvent, ChangeHandler, ChangeQueue};
use drivewatch::channel::ChannelInfo;
use drivewatch::drive::{ChannelApi, DriveError, WatchRequest, WatchResponse};
use drivewatch::lifecycle::ChannelManager;
use drivewatch::registry::ChannelRegistry;
use parking_lot::Mutex;

pub const WEBHOOK_URL: &str = "https://hook.example/drive-webhook";

/// Stand-in for the Drive API that records every call.
#[derive(Default)]
pub struct FakeDrive {
    pub watches: Mutex<Vec<WatchRequest>>,
    pub stops: Mutex<Vec<String>>,
    pub failing_stops: Mutex<HashSet<String>>,
    pub fail_watch: Mutex<bool>,
}

impl FakeDrive {
    pub fn stopped(&self) -> Vec<String> {
        self.stops.lock().clone()
    }

    pub fn fail_stop_for(&self, channel_id: &str) {
        self.failing_stops.lock().insert(channel_id.to_string());
    }
}

#[async_trait]
impl ChannelApi for FakeDrive {
    async fn watch(&self, request: WatchRequest) -> Result<WatchResponse, DriveError> {
        if *self.fail_watch.lock() {
            return Err(DriveError::Status {
                status: 500,
                body: "backend error".into(),
            });
        }
        let response = WatchResponse {
            resource_id: format!("drive-{}", request.channel_id),
            expiration: request.expiration,
        };
        self.watches.lock().push(request);
        Ok(response)
    }

    async fn stop(&self, channel_id: &str, _resource_id: &str) -> Result<(), DriveError> {
        self.stops.lock().push(channel_id.to_string());
        if self.failing_stops.lock().contains(channel_id) {
            return Err(DriveError::Status {
                status: 404,
                body: "channel not found".into(),
            });
        }
        Ok(())
    }
}

/// Change handler that remembers what it was given.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<ChangeEvent>>,
}

#[async_trait]
impl ChangeHandler for RecordingHandler {
    async fn handle(&self, event: ChangeEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

pub fn channel(id: &str, resource: &str, expires_in: Duration) -> ChannelInfo {
    ChannelInfo {
        id: id.into(),
        resource_id: format!("drive-{id}"),
        tracked_resource: resource.into(),
        expires_at: Utc::now() + expires_in,
        token: Some(format!("token-{id}")),
    }
}

pub fn manager(registry: ChannelRegistry, drive: Arc<FakeDrive>) -> Arc<ChannelManager> {
    Arc::new(ChannelManager::new(registry, drive, WEBHOOK_URL.into()))
}

/// Router wired to a fake Drive and a recording change handler.
pub fn test_app(
    registry: ChannelRegistry,
) -> (axum::Router, Arc<ChannelManager>, Arc<RecordingHandler>) {
    let manager = manager(registry, Arc::new(FakeDrive::default()));
    let handler = Arc::new(RecordingHandler::default());
    let state = AppState {
        manager: manager.clone(),
        changes: ChangeQueue::spawn(handler.clone()),
    };
    (
        api::router(state, api::DEFAULT_WEBHOOK_PATH),
        manager,
        handler,
    )
}

pub fn live_channels_for(registry: &ChannelRegistry, resource: &str) -> Vec<ChannelInfo> {
    let now: DateTime<Utc> = Utc::now();
    registry.list_where(|c| c.tracked_resource == resource && !c.is_expired_at(now))
}
