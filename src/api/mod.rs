pub mod error;
mod handlers;
pub mod notification;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::change::ChangeQueue;
use crate::lifecycle::ChannelManager;

use handlers::*;

/// Path Drive delivers push notifications to when none is configured.
pub const DEFAULT_WEBHOOK_PATH: &str = "/drive-webhook";

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChannelManager>,
    pub changes: ChangeQueue,
}

/// Build the webhook router: `POST {webhook_path}` for Drive notifications
/// and `GET /health`. Any other method on the webhook path gets a 405.
pub fn router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            webhook_path,
            post(drive_webhook).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
