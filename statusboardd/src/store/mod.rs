//! Process-wide status store.
//!
//! One record per configured service, keyed by name. Records are held behind
//! `Arc` and replaced whole, so a reader sees either the old record or the new
//! one, never a mix. A hash over the outcome fields of all records is
//! published on a watch channel whenever an outcome changes.

pub mod hash;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use shared::types::StatusRecord;

struct Inner {
    records: HashMap<String, Arc<StatusRecord>>,
    last_sweep_completed_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy of the store.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub records: HashMap<String, Arc<StatusRecord>>,
    pub last_sweep_completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<RwLock<Inner>>,
    hash_tx: Arc<watch::Sender<String>>,
}

impl StatusStore {
    /// Create a store holding an `unknown` record for every name.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let unknown = Arc::new(StatusRecord::unknown());
        let records: HashMap<String, Arc<StatusRecord>> = names
            .into_iter()
            .map(|name| (name.to_string(), unknown.clone()))
            .collect();

        let initial_hash = hash::compute_hash(records.iter().map(|(k, v)| (k.as_str(), v.as_ref())));
        let (hash_tx, _) = watch::channel(initial_hash);

        Self {
            inner: Arc::new(RwLock::new(Inner {
                records,
                last_sweep_completed_at: None,
            })),
            hash_tx: Arc::new(hash_tx),
        }
    }

    // A panicking writer can only have left a whole record behind, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current record for `name`; `unknown` for names never set.
    pub fn get(&self, name: &str) -> StatusRecord {
        self.read()
            .records
            .get(name)
            .map(|record| record.as_ref().clone())
            .unwrap_or_default()
    }

    /// Replace the record for `name` wholesale.
    pub fn set(&self, name: &str, record: StatusRecord) {
        let mut inner = self.write();
        let changed = inner
            .records
            .get(name)
            .map(|old| hash::outcome_changed(old, &record))
            .unwrap_or(true);

        inner.records.insert(name.to_string(), Arc::new(record));

        // Only recompute the hash when an outcome actually changed
        if changed {
            let new_hash = hash::compute_hash(
                inner.records.iter().map(|(k, v)| (k.as_str(), v.as_ref())),
            );
            self.hash_tx.send_replace(new_hash);
        }
    }

    pub fn mark_sweep_completed(&self, at: DateTime<Utc>) {
        self.write().last_sweep_completed_at = Some(at);
    }

    /// Consistent copy of every record.
    pub fn snapshot_all(&self) -> StoreSnapshot {
        let inner = self.read();
        StoreSnapshot {
            records: inner.records.clone(),
            last_sweep_completed_at: inner.last_sweep_completed_at,
        }
    }

    pub fn subscribe_hash(&self) -> watch::Receiver<String> {
        self.hash_tx.subscribe()
    }
}
