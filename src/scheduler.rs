use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::ChannelManager;

/// Default time between renewal scans.
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(20 * 60 * 60);

/// Channels with less than this left are renewed on the next scan.
pub const DEFAULT_RENEW_THRESHOLD: Duration = Duration::from_secs(4 * 60 * 60);

/// Background task that periodically renews channels nearing expiry.
///
/// Runs until its cancellation token fires; it never stops on its own.
pub struct RenewalScheduler {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl RenewalScheduler {
    /// Spawn the renewal loop. The first scan happens one `interval` after start.
    pub fn spawn(manager: Arc<ChannelManager>, interval: Duration, threshold: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(renewal_loop(manager, interval, threshold, cancel.clone()));
        Self { cancel, task }
    }

    /// Signal the loop to exit. A scan already in progress runs to completion
    /// first, so no channel is left half-renewed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to finish. Consumes the handle.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

async fn renewal_loop(
    manager: Arc<ChannelManager>,
    interval: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval() fires immediately; skip that so the first scan waits a full period.
    ticker.tick().await;

    tracing::info!(?interval, ?threshold, "channel renewer started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Never cancelled mid-scan: a watch Drive accepted must reach the registry.
        let renewed = manager.renew_expiring(threshold).await;
        tracing::debug!(count = renewed.len(), "renewal scan finished");
    }
    tracing::info!("channel renewer stopped");
}
