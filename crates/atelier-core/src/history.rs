use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::types::{ChannelId, Turn};

/// Per-channel conversation log. Append-only until cleared; unbounded in size.
#[derive(Debug, Default)]
pub struct HistoryStore {
    channels: Mutex<HashMap<ChannelId, Vec<Turn>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, Vec<Turn>>> {
        // every mutation is a single push or remove, so a poisoned map is still consistent
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, channel_id: ChannelId, turn: Turn) {
        self.lock().entry(channel_id).or_default().push(turn);
    }

    /// Snapshot of the channel's turns in append order. Empty when the channel has no history.
    pub fn get(&self, channel_id: ChannelId) -> Vec<Turn> {
        self.lock().get(&channel_id).cloned().unwrap_or_default()
    }

    pub fn len(&self, channel_id: ChannelId) -> usize {
        self.lock().get(&channel_id).map(Vec::len).unwrap_or(0)
    }

    /// Returns whether the channel had any history.
    pub fn clear(&self, channel_id: ChannelId) -> bool {
        let removed = self.lock().remove(&channel_id);
        let existed = removed.as_ref().is_some_and(|turns| !turns.is_empty());
        debug!("history clear: channel_id={} existed={}", channel_id, existed);
        existed
    }

    /// Drops every channel's history. Returns how many channels were cleared.
    pub fn clear_all(&self) -> usize {
        let mut map = self.lock();
        let count = map.len();
        map.clear();
        count
    }
}
