use std::sync::Arc;
use chrono::Utc;
use shared::types::{ServiceDefinition, ServiceStatus, StatusSummary, SweepSnapshot};
use crate::store::StatusStore;

/// Joins the configured services with their current records for consumers.
#[derive(Clone)]
pub struct SnapshotPublisher {
    services: Arc<[ServiceDefinition]>,
    store: StatusStore,
    check_interval_millis: u64,
}

impl SnapshotPublisher {
    pub fn new(services: Arc<[ServiceDefinition]>, store: StatusStore, check_interval_millis: u64) -> Self {
        Self {
            services,
            store,
            check_interval_millis,
        }
    }

    /// Build a snapshot in configuration order. Reads only.
    pub fn snapshot(&self) -> SweepSnapshot {
        let store = self.store.snapshot_all();

        let services: Vec<ServiceStatus> = self
            .services
            .iter()
            .map(|definition| ServiceStatus {
                definition: definition.clone(),
                status: store
                    .records
                    .get(&definition.name)
                    .map(|record| record.as_ref().clone())
                    .unwrap_or_default(),
            })
            .collect();

        SweepSnapshot {
            summary: StatusSummary::tally(services.iter().map(|s| &s.status)),
            services,
            generated_at: Utc::now(),
            last_sweep_completed_at: store.last_sweep_completed_at,
            check_interval_millis: self.check_interval_millis,
        }
    }

    /// Current row for one service, if it is configured.
    pub fn service(&self, name: &str) -> Option<ServiceStatus> {
        self.services
            .iter()
            .find(|definition| definition.name == name)
            .map(|definition| ServiceStatus {
                definition: definition.clone(),
                status: self.store.get(name),
            })
    }
}
