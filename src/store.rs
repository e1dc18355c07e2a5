//! On-disk persistence for the channel registry.
//!
//! The whole registry is written as one JSON document shaped as
//! `{"channels": {<id>: ChannelInfo}}`. A missing document and an empty
//! registry are the same state: saving an empty map deletes the file.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::ChannelInfo;

pub type ChannelMap = HashMap<String, ChannelInfo>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access state file {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("state file {0} is corrupt: {1}")]
    Corrupt(PathBuf, #[source] serde_json::Error),

    #[error("failed to serialize channel state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    channels: Option<ChannelMap>,
}

/// JSON file holding a snapshot of every known channel.
#[derive(Debug, Clone)]
pub struct ChannelStore {
    path: PathBuf,
}

impl ChannelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted channels. A missing file is an empty map.
    pub fn load(&self) -> Result<ChannelMap, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ChannelMap::new()),
            Err(e) => return Err(StoreError::Io(self.path.clone(), e)),
        };

        let doc: StateDocument = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Corrupt(self.path.clone(), e))?;
        Ok(doc.channels.unwrap_or_default())
    }

    /// Load, falling back to an empty map when the document is unreadable.
    ///
    /// A corrupt document is moved aside to `<path>.corrupt` so the channels
    /// it named can still be inspected by hand.
    pub fn load_or_empty(&self) -> ChannelMap {
        match self.load() {
            Ok(channels) => channels,
            Err(StoreError::Corrupt(path, e)) => {
                let preserved = self.corrupt_path();
                match std::fs::rename(&path, &preserved) {
                    Ok(()) => tracing::warn!(
                        error = %e,
                        preserved = %preserved.display(),
                        "channel state is corrupt, starting empty"
                    ),
                    Err(rename_err) => tracing::warn!(
                        error = %e,
                        %rename_err,
                        path = %path.display(),
                        "channel state is corrupt and could not be moved aside, starting empty"
                    ),
                }
                ChannelMap::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load channel state, starting empty");
                ChannelMap::new()
            }
        }
    }

    /// Overwrite the document with `channels`, or delete it when empty.
    ///
    /// The new document is written to a sibling temp file, flushed to disk,
    /// and renamed over the old one, so neither a failed save nor a crash
    /// right after it leaves a truncated document behind.
    pub fn save(&self, channels: &ChannelMap) -> Result<(), StoreError> {
        if channels.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::Io(self.path.clone(), e)),
            };
        }

        let doc = StateDocument {
            channels: Some(channels.clone()),
        };
        let data = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Io(self.path.clone(), e))?;
            }
        }

        let tmp = self.tmp_path();
        write_synced(&tmp, &data).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::Io(tmp.clone(), e)
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::Io(self.path.clone(), e)
        })
    }

    fn tmp_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, ".tmp")
    }

    fn corrupt_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, ".corrupt")
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
