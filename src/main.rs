//! drivewatch - Google Drive change watcher
//!
//! Opens a push-notification channel on a Drive file, keeps it renewed, and
//! serves the webhook Drive delivers notifications to. Channel state is kept
//! in a JSON file so a restart can retire the channels the previous run left
//! behind. On SIGINT/SIGTERM every channel is stopped before exit.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as ClapParser;
use drivewatch::{
    api, auth,
    change::{ChangeHandler, ChangeQueue, CommandChangeHandler, LogChangeHandler},
    config::{self, ConfigError, Credentials, WatchConfig},
    drive::{DriveClient, DriveError},
    lifecycle::{ChannelManager, LifecycleError},
    registry::ChannelRegistry,
    scheduler::RenewalScheduler,
    store::ChannelStore,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// drivewatch - keep a Google Drive watch channel alive and react to changes
#[derive(ClapParser, Debug)]
#[command(name = "drivewatch", version, about, long_about = None)]
struct Cli {
    /// Path to the JSON credentials file for the Drive API
    #[arg(long, env = "DRIVEWATCH_CREDS")]
    creds: PathBuf,

    /// Public URL Drive should deliver notifications to
    #[arg(long, env = "DRIVEWATCH_WEBHOOK")]
    webhook: String,

    /// Id of the Drive file (e.g. a Google Sheet) to watch
    #[arg(long, visible_alias = "resource")]
    sheet: String,

    /// Port for the webhook server
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Address to bind the webhook server
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where channel state is persisted (overrides the config file)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Shell command run for every detected change
    #[arg(long)]
    on_change: Option<String>,
}

#[derive(Error, Debug)]
pub enum DrivewatchError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("drive client error: {0}")]
    Drive(#[from] DriveError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), DrivewatchError> {
    let cli = Cli::parse();
    init_tracing();
    run(cli).await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "drivewatch=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> Result<(), DrivewatchError> {
    let mut watch_config = match &cli.config {
        Some(path) => WatchConfig::load(path)?,
        None => WatchConfig::default(),
    };
    if let Some(state_file) = cli.state_file {
        watch_config.channels.state_file = state_file;
    }
    watch_config.validate()?;
    config::validate_webhook_url(&cli.webhook)?;
    let tokens = auth::token_source(Credentials::load(&cli.creds)?)?;

    let client = DriveClient::new(
        watch_config.drive.api_base.clone(),
        tokens,
        Duration::from_secs(watch_config.drive.connect_timeout_secs),
        Duration::from_secs(watch_config.drive.request_timeout_secs),
    )?;

    // Signal handlers go in before anything remote happens, so a signal at
    // any point from here on ends in stop_all instead of the default action.
    let shutdown = shutdown_on_signal()?;

    let registry = ChannelRegistry::load(ChannelStore::new(&watch_config.channels.state_file));
    let manager = Arc::new(
        ChannelManager::new(registry, Arc::new(client), cli.webhook.clone())
            .with_max_duration(watch_config.channels.max_duration()),
    );

    let handler: Arc<dyn ChangeHandler> = match cli.on_change {
        Some(command) => Arc::new(CommandChangeHandler::new(command)),
        None => Arc::new(LogChangeHandler),
    };
    let state = api::AppState {
        manager: manager.clone(),
        changes: ChangeQueue::spawn(handler),
    };
    let app = api::router(state, &watch_config.webhook.path);

    // Serve before creating the channel so Drive's initial sync can be answered.
    let addr = SocketAddr::new(cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, path = %watch_config.webhook.path, "webhook server listening");

    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                server_shutdown_rx.await.ok();
            })
            .await
    });

    // Not raced against the signal: dropping the call mid-flight could leave
    // a channel open on Drive that was never recorded.
    let watched = manager.watch(&cli.sheet).await;

    let scheduler = match &watched {
        Ok(info) => {
            tracing::info!(sheet = %cli.sheet, channel_id = %info.id, "watching sheet");
            if shutdown.is_cancelled() {
                None
            } else {
                tracing::info!("press Ctrl+C to stop");
                Some(RenewalScheduler::spawn(
                    manager.clone(),
                    watch_config.channels.renew_interval(),
                    watch_config.channels.renew_threshold(),
                ))
            }
        }
        Err(e) => {
            tracing::error!(sheet = %cli.sheet, error = %e, "failed to watch sheet");
            None
        }
    };

    if let Some(scheduler) = scheduler {
        shutdown.cancelled().await;
        tracing::info!("shutting down gracefully");
        scheduler.shutdown();
        scheduler.join().await;
    }

    manager.stop_all().await;

    let _ = server_shutdown_tx.send(());
    http_handle.await??;

    watched?;
    tracing::info!("drivewatch exiting");
    Ok(())
}

/// Install SIGINT/SIGTERM handlers now and return a token cancelled when
/// either arrives.
#[cfg(unix)]
fn shutdown_on_signal() -> std::io::Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => tracing::info!("received SIGINT"),
            _ = terminate.recv() => tracing::info!("received SIGTERM"),
        }
        cancel.cancel();
    });
    Ok(token)
}

#[cfg(not(unix))]
fn shutdown_on_signal() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C");
            cancel.cancel();
        }
    });
    Ok(token)
}
