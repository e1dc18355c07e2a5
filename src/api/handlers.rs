use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::Serialize;
use subtle::ConstantTimeEq;

use crate::change::ChangeEvent;

use super::error::ApiError;
use super::notification::{Notification, ResourceState};
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    channels: usize,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        channels: state.manager.registry().len(),
    })
}

/// Push notification endpoint.
///
/// Always acknowledges with 200 so Drive does not redeliver; events for
/// unknown or superseded channels are dropped here.
pub(super) async fn drive_webhook(State(state): State<AppState>, headers: HeaderMap) -> StatusCode {
    let notification = Notification::from_headers(&headers);

    let Some(channel) = state.manager.registry().get(&notification.channel_id) else {
        tracing::debug!(
            channel_id = %notification.channel_id,
            "ignoring notification from unknown channel"
        );
        return StatusCode::OK;
    };

    if let Some(expected) = channel.token.as_deref() {
        let presented = notification.token.as_deref().unwrap_or_default();
        if !bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            tracing::warn!(
                channel_id = %notification.channel_id,
                "ignoring notification with mismatched channel token"
            );
            return StatusCode::OK;
        }
    }

    tracing::info!(
        channel_id = %notification.channel_id,
        state = %notification.resource_state,
        resource_id = %notification.resource_id,
        message_number = ?notification.message_number,
        expiration = ?notification.expiration,
        "received notification"
    );

    match notification.resource_state {
        ResourceState::Sync => {
            tracing::info!(channel_id = %notification.channel_id, "channel synchronized");
        }
        resource_state @ (ResourceState::Change | ResourceState::Update) => {
            let event = ChangeEvent {
                channel_id: notification.channel_id,
                resource_id: notification.resource_id,
                resource_state,
                message_number: notification.message_number,
                resource_uri: notification.resource_uri,
                file_id: channel.tracked_resource,
            };
            if !state.changes.submit(event) {
                tracing::warn!("change queue is closed, dropping notification");
            }
        }
        ResourceState::Other(other) => {
            tracing::warn!(channel_id = %notification.channel_id, state = %other, "unknown resource state");
        }
    }

    StatusCode::OK
}

pub(super) async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

pub(super) async fn not_found() -> ApiError {
    ApiError::NotFound
}
