//! Resumable file-picker snapshot cache. Has no behavioural coupling to
//! the scheduling core — the Scheduler and
//! Dispatcher never read this module; it exists purely so a transport
//! layer can let a client resume a large file picker across reconnects.
//!
//! ULID keys (rather than the scheduler's plain `AtomicU64` job ids) are
//! used here because these snapshots are meant to be shared as opaque
//! tokens with an external client, where a guessable sequential id would
//! let one client enumerate another's snapshot.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::domain::PickerSnapshot;
use crate::sync_ext::MutexExt;
use crate::time::now_ms;

pub struct PickerSnapshotStore {
    snapshots: Mutex<HashMap<String, PickerSnapshot>>,
}

impl PickerSnapshotStore {
    pub fn new() -> Self {
        PickerSnapshotStore {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, snapshot: PickerSnapshot) -> String {
        let key = ulid::Ulid::new().to_string();
        self.snapshots.lock_unpoisoned().insert(key.clone(), snapshot);
        key
    }

    /// Looks up `key`, purging it (and any other now-expired entries) as a
    /// side effect — lazy purge-on-read, no background sweeper thread.
    pub fn get(&self, key: &str) -> Option<PickerSnapshot> {
        let now = now_ms();
        let mut guard = self.snapshots.lock_unpoisoned();
        guard.retain(|_, snapshot| snapshot.expires_at_ms > now);
        guard.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock_unpoisoned().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PickerSnapshotStore {
    fn default() -> Self {
        PickerSnapshotStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let store = PickerSnapshotStore::new();
        let key = store.insert(PickerSnapshot {
            files: vec!["a.mp4".into()],
            config: None,
            expires_at_ms: now_ms() + 60_000,
        });
        assert!(store.get(&key).is_some());
    }

    #[test]
    fn expired_snapshot_is_purged_on_read() {
        let store = PickerSnapshotStore::new();
        let key = store.insert(PickerSnapshot {
            files: vec![],
            config: None,
            expires_at_ms: 1,
        });
        assert!(store.get(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_key_returns_none() {
        let store = PickerSnapshotStore::new();
        assert!(store.get("not-a-real-key").is_none());
    }
}
