//! SIGTERM handling of the binary.
//!
//! Whenever the signal lands after startup, drivewatch must stop the channel
//! it opened on Drive, remove the state file, and exit cleanly.

#![cfg(unix)]

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::time::timeout;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Recorded {
    watch_started: usize,
    watched: Vec<String>,
    stopped: Vec<String>,
}

/// Drive API stand-in served over HTTP so the real client is exercised.
struct FakeDrive {
    watch_delay: Duration,
    recorded: Mutex<Recorded>,
}

async fn watch_file(
    State(drive): State<Arc<FakeDrive>>,
    Path(_file_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    drive.recorded.lock().watch_started += 1;
    tokio::time::sleep(drive.watch_delay).await;

    let id = body["id"].as_str().unwrap_or_default().to_string();
    drive.recorded.lock().watched.push(id.clone());
    Json(json!({
        "kind": "api#channel",
        "id": id,
        "resourceId": format!("res-{id}"),
        "expiration": body["expiration"],
    }))
}

async fn stop_channel(State(drive): State<Arc<FakeDrive>>, Json(body): Json<Value>) -> StatusCode {
    let id = body["id"].as_str().unwrap_or_default().to_string();
    drive.recorded.lock().stopped.push(id);
    StatusCode::NO_CONTENT
}

async fn spawn_fake_drive(watch_delay: Duration) -> (String, Arc<FakeDrive>) {
    let drive = Arc::new(FakeDrive {
        watch_delay,
        recorded: Mutex::new(Recorded::default()),
    });
    let app = Router::new()
        .route("/files/{file_id}/watch", post(watch_file))
        .route("/channels/stop", post(stop_channel))
        .with_state(drive.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), drive)
}

struct Drivewatch {
    child: Child,
    port: u16,
    state_file: PathBuf,
    _dir: tempfile::TempDir,
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_drivewatch(api_base: &str) -> Drivewatch {
    let dir = tempfile::tempdir().unwrap();
    let creds = dir.path().join("creds.json");
    std::fs::write(&creds, r#"{"access_token": "tok"}"#).unwrap();
    let config = dir.path().join("drivewatch.toml");
    std::fs::write(
        &config,
        format!("[drive]\napi_base = \"{api_base}\"\nrequest_timeout_secs = 10\n"),
    )
    .unwrap();
    let state_file = dir.path().join("channels.json");
    let port = free_port();

    let child = Command::new(env!("CARGO_BIN_EXE_drivewatch"))
        .arg("--creds")
        .arg(&creds)
        .args(["--webhook", "https://hook.example/drive-webhook"])
        .args(["--sheet", "doc1"])
        .args(["--bind", "127.0.0.1"])
        .args(["--port", &port.to_string()])
        .arg("--config")
        .arg(&config)
        .arg("--state-file")
        .arg(&state_file)
        .env_remove("DRIVEWATCH_CREDS")
        .env_remove("DRIVEWATCH_WEBHOOK")
        .env("RUST_LOG", "off")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn drivewatch");

    Drivewatch {
        child,
        port,
        state_file,
        _dir: dir,
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn wait_for_health(port: u16) {
    let url = format!("http://127.0.0.1:{port}/health");
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + STARTUP_TIMEOUT;
    loop {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "drivewatch did not become ready");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn sigterm(child: &Child) {
    let pid = child.id().expect("drivewatch exited early");
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn sigterm_after_startup_stops_channel_and_clears_state() {
    let (base, drive) = spawn_fake_drive(Duration::ZERO).await;
    let mut drivewatch = start_drivewatch(&base);

    wait_for_health(drivewatch.port).await;
    wait_until("channel creation", || drivewatch.state_file.exists()).await;
    let channel_id = drive.recorded.lock().watched[0].clone();

    sigterm(&drivewatch.child);
    let status = timeout(SHUTDOWN_TIMEOUT, drivewatch.child.wait())
        .await
        .expect("drivewatch did not exit after SIGTERM")
        .unwrap();

    assert!(status.success(), "exit status: {status}");
    assert_eq!(drive.recorded.lock().stopped, vec![channel_id]);
    assert!(!drivewatch.state_file.exists());
}

#[tokio::test]
async fn sigterm_during_initial_watch_still_stops_channel() {
    let (base, drive) = spawn_fake_drive(Duration::from_millis(1500)).await;
    let mut drivewatch = start_drivewatch(&base);

    wait_until("the initial watch request", || {
        drive.recorded.lock().watch_started > 0
    })
    .await;
    assert!(drive.recorded.lock().watched.is_empty());

    sigterm(&drivewatch.child);
    let status = timeout(SHUTDOWN_TIMEOUT, drivewatch.child.wait())
        .await
        .expect("drivewatch did not exit after SIGTERM")
        .unwrap();

    assert!(status.success(), "exit status: {status}");
    let recorded = drive.recorded.lock();
    assert_eq!(recorded.watched.len(), 1);
    assert_eq!(recorded.stopped, recorded.watched);
    assert!(!drivewatch.state_file.exists());
}
