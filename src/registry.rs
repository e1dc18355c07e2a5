use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::ChannelInfo;
use crate::store::{ChannelMap, ChannelStore};

/// In-memory map of channel id to [`ChannelInfo`], shared by every component.
///
/// All access goes through one mutex. When backed by a [`ChannelStore`],
/// every mutation that changes the map writes a snapshot while the lock is
/// still held, so the persisted document never lags behind or interleaves
/// with another writer. Save failures are logged and do not undo the change
/// in memory.
///
/// Never hold the registry across remote calls: copy what you need out with
/// [`get`](Self::get) or [`list_where`](Self::list_where) first.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Mutex<ChannelMap>>,
    store: Option<ChannelStore>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty, memory-only registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelMap::new())),
            store: None,
        }
    }

    /// Create a registry seeded from `store`, persisting every change back to it.
    pub fn load(store: ChannelStore) -> Self {
        let channels = store.load_or_empty();
        if !channels.is_empty() {
            tracing::info!(count = channels.len(), "loaded channels from previous state");
        }
        Self {
            inner: Arc::new(Mutex::new(channels)),
            store: Some(store),
        }
    }

    pub fn get(&self, id: &str) -> Option<ChannelInfo> {
        self.inner.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Insert or replace an entry.
    pub fn put(&self, info: ChannelInfo) {
        let mut channels = self.inner.lock();
        channels.insert(info.id.clone(), info);
        self.persist(&channels);
    }

    /// Remove an entry. Returns the removed entry, if any.
    pub fn delete(&self, id: &str) -> Option<ChannelInfo> {
        let mut channels = self.inner.lock();
        let removed = channels.remove(id);
        if removed.is_some() {
            self.persist(&channels);
        }
        removed
    }

    /// Remove every entry matching `predicate` in one critical section.
    /// Returns the removed entries.
    pub fn delete_where<F>(&self, mut predicate: F) -> Vec<ChannelInfo>
    where
        F: FnMut(&ChannelInfo) -> bool,
    {
        let mut channels = self.inner.lock();
        let ids: Vec<String> = channels
            .values()
            .filter(|info| predicate(info))
            .map(|info| info.id.clone())
            .collect();
        let removed: Vec<ChannelInfo> = ids.iter().filter_map(|id| channels.remove(id)).collect();
        if !removed.is_empty() {
            self.persist(&channels);
        }
        removed
    }

    /// Point-in-time copy of every entry.
    pub fn list_all(&self) -> Vec<ChannelInfo> {
        self.inner.lock().values().cloned().collect()
    }

    /// Point-in-time copy of the entries matching `predicate`.
    pub fn list_where<F>(&self, mut predicate: F) -> Vec<ChannelInfo>
    where
        F: FnMut(&ChannelInfo) -> bool,
    {
        self.inner
            .lock()
            .values()
            .filter(|info| predicate(info))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn persist(&self, channels: &ChannelMap) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(channels) {
                tracing::warn!(error = %e, "failed to save channel state");
            }
        }
    }
}
