//! In-process advisory locks: at most one sync per data source at a time.

use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct InFlight {
    pub data_source_id: Uuid,
    pub log_id: Option<Uuid>,
    pub started_at: NaiveDateTime,
}

#[derive(Clone, Default)]
pub struct SourceLocks {
    inner: Arc<DashMap<Uuid, InFlight>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a sync for `id` is already running.
    pub fn try_acquire(&self, id: Uuid) -> Option<SyncGuard> {
        match self.inner.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    data_source_id: id,
                    log_id: None,
                    started_at: Utc::now().naive_utc(),
                });
                Some(SyncGuard {
                    locks: self.inner.clone(),
                    id,
                })
            }
        }
    }

    pub fn is_locked(&self, id: Uuid) -> bool {
        self.inner.contains_key(&id)
    }

    /// Currently running syncs, oldest first.
    pub fn snapshot(&self) -> Vec<InFlight> {
        let mut runs: Vec<InFlight> = self.inner.iter().map(|e| e.value().clone()).collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }
}

/// Held for the duration of one sync; releases the lock on drop.
pub struct SyncGuard {
    locks: Arc<DashMap<Uuid, InFlight>>,
    id: Uuid,
}

impl SyncGuard {
    pub fn set_log_id(&self, log_id: Uuid) {
        if let Some(mut entry) = self.locks.get_mut(&self.id) {
            entry.log_id = Some(log_id);
        }
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.locks.remove(&self.id);
    }
}
