use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::DEFAULT_WEBHOOK_PATH;
use crate::drive::DEFAULT_API_BASE;
use crate::lifecycle::DEFAULT_MAX_CHANNEL_DURATION;
use crate::scheduler::{DEFAULT_RENEW_INTERVAL, DEFAULT_RENEW_THRESHOLD};

/// Default location of the channel state file, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = ".drive-channels.json";

/// Errors that can occur while loading configuration or credentials.
/// All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config {0}: {1}")]
    ParseFailed(PathBuf, #[source] toml::de::Error),

    #[error("failed to parse credentials {0}: {1}")]
    CredentialsParseFailed(PathBuf, #[source] serde_json::Error),

    #[error("credentials {0} contain no access_token")]
    MissingAccessToken(PathBuf),

    #[error("invalid service account key {0}: {1}")]
    ServiceAccount(PathBuf, String),

    #[error("invalid webhook URL {0:?}: must be an http(s) URL")]
    InvalidWebhookUrl(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Optional TOML configuration. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub channels: ChannelsConfig,
    pub webhook: WebhookConfig,
    pub drive: DriveConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Lifetime requested for each new channel.
    pub max_duration_secs: u64,
    /// Time between renewal scans.
    pub renew_interval_secs: u64,
    /// Channels with less than this left are renewed.
    pub renew_threshold_secs: u64,
    pub state_file: PathBuf,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: DEFAULT_MAX_CHANNEL_DURATION.as_secs(),
            renew_interval_secs: DEFAULT_RENEW_INTERVAL.as_secs(),
            renew_threshold_secs: DEFAULT_RENEW_THRESHOLD.as_secs(),
            state_file: PathBuf::from(DEFAULT_STATE_FILE),
        }
    }
}

impl ChannelsConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_secs)
    }

    pub fn renew_threshold(&self) -> Duration {
        Duration::from_secs(self.renew_threshold_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Local path Drive notifications are served on.
    pub path: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_WEBHOOK_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub api_base: String,
    pub connect_timeout_secs: u64,
    /// Upper bound for each watch/stop call.
    pub request_timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

impl WatchConfig {
    /// Load config from a TOML file. The file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.channels;
        if c.max_duration_secs == 0 {
            return Err(ConfigError::Invalid("max_duration_secs must be positive".into()));
        }
        if c.renew_interval_secs == 0 || c.renew_interval_secs >= c.max_duration_secs {
            return Err(ConfigError::Invalid(
                "renew_interval_secs must be positive and shorter than max_duration_secs".into(),
            ));
        }
        if c.renew_threshold_secs >= c.max_duration_secs {
            return Err(ConfigError::Invalid(
                "renew_threshold_secs must be shorter than max_duration_secs".into(),
            ));
        }
        if !self.webhook.path.starts_with('/') || self.webhook.path == "/health" {
            return Err(ConfigError::Invalid(format!(
                "webhook path {:?} must start with '/' and must not be /health",
                self.webhook.path
            )));
        }
        if self.drive.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Drive API credentials, classified by the file's contents.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// A service-account key (`"type": "service_account"`). Tokens are minted
    /// and refreshed in-process.
    ServiceAccount { path: PathBuf, key_json: String },
    /// A `{"access_token": ...}` file kept fresh by something else. It is
    /// re-read for every request.
    AccessTokenFile(PathBuf),
}

#[derive(Deserialize)]
struct CredentialsKind {
    #[serde(rename = "type")]
    kind: Option<String>,
    access_token: Option<String>,
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        check_config_permissions(path);

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let fields: CredentialsKind = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::CredentialsParseFailed(path.to_path_buf(), e))?;

        if fields.kind.as_deref() == Some("service_account") {
            return Ok(Self::ServiceAccount {
                path: path.to_path_buf(),
                key_json: contents,
            });
        }
        match fields.access_token {
            Some(token) if !token.trim().is_empty() => {
                Ok(Self::AccessTokenFile(path.to_path_buf()))
            }
            _ => Err(ConfigError::MissingAccessToken(path.to_path_buf())),
        }
    }
}

/// Reject anything but an absolute http(s) URL for the public webhook address.
pub fn validate_webhook_url(url: &str) -> Result<(), ConfigError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => Err(ConfigError::InvalidWebhookUrl(url.to_string())),
    }
}

/// Warn if a credentials file is world-readable.
#[cfg(unix)]
pub fn check_config_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return,
    };

    let mode = metadata.permissions().mode();
    if is_world_readable(mode) {
        tracing::warn!(
            "Credentials file {} is world-readable (mode {:o}). \
             Consider restricting permissions to 600.",
            path.display(),
            mode & 0o7777,
        );
    }
}

#[cfg(not(unix))]
pub fn check_config_permissions(_path: &Path) {}

#[cfg(unix)]
pub fn is_world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}
