//! Downstream handling of detected file changes.
//!
//! The webhook only enqueues a [`ChangeEvent`]; a worker drains the queue and
//! runs each handler invocation as its own task. There is no backpressure and
//! no ordering guarantee between events, and delivery is only as reliable as
//! Drive's own at-least-once push.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::api::notification::ResourceState;

/// A change reported on a recognized channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub channel_id: String,
    pub resource_id: String,
    pub resource_state: ResourceState,
    pub message_number: Option<u64>,
    pub resource_uri: Option<String>,
    /// The watched file, as recorded for the channel.
    pub file_id: String,
}

#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, event: ChangeEvent) -> anyhow::Result<()>;
}

/// Logs each change and does nothing else.
pub struct LogChangeHandler;

#[async_trait]
impl ChangeHandler for LogChangeHandler {
    async fn handle(&self, event: ChangeEvent) -> anyhow::Result<()> {
        tracing::info!(
            channel_id = %event.channel_id,
            resource_id = %event.resource_id,
            file_id = %event.file_id,
            state = %event.resource_state,
            "processing file change"
        );
        Ok(())
    }
}

/// Runs a shell command (`sh -c`) per change with the event in its environment.
pub struct CommandChangeHandler {
    command: String,
}

impl CommandChangeHandler {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ChangeHandler for CommandChangeHandler {
    async fn handle(&self, event: ChangeEvent) -> anyhow::Result<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("DRIVEWATCH_CHANNEL_ID", &event.channel_id)
            .env("DRIVEWATCH_RESOURCE_ID", &event.resource_id)
            .env("DRIVEWATCH_RESOURCE_STATE", event.resource_state.as_str())
            .env(
                "DRIVEWATCH_MESSAGE_NUMBER",
                event.message_number.map(|n| n.to_string()).unwrap_or_default(),
            )
            .env("DRIVEWATCH_FILE_ID", &event.file_id)
            .stdin(std::process::Stdio::null())
            .status()
            .await?;

        if !status.success() {
            anyhow::bail!("change command exited with {status}");
        }
        Ok(())
    }
}

/// Sending half of the change queue. Cheap to clone.
#[derive(Clone)]
pub struct ChangeQueue {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChangeQueue {
    /// Create the queue and spawn its worker on the current runtime.
    pub fn spawn(handler: Arc<dyn ChangeHandler>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(drain(rx, handler));
        Self { tx }
    }

    /// Queue an event. Never blocks; returns false if the worker is gone.
    pub fn submit(&self, event: ChangeEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<ChangeEvent>, handler: Arc<dyn ChangeHandler>) {
    while let Some(event) = rx.recv().await {
        let handler = handler.clone();
        tokio::spawn(async move {
            let channel_id = event.channel_id.clone();
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(%channel_id, error = %e, "change handler failed");
                }
                Err(_) => {
                    tracing::error!(%channel_id, "change handler panicked");
                }
            }
        });
    }
    tracing::debug!("change queue closed");
}
