//! Edit service: commit, then rebuild before returning
//!
//! The single entry point an admin route calls. A store rejection returns
//! the [`StorageError`] untouched and never reaches the orchestrator; a
//! committed change always returns `Ok`, with failed rebuilds reported as a
//! degraded outcome.

use std::sync::Arc;

use pagegraph_storage::{EntityChange, MutationEvent, RecordStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::orchestrator::{RebuildOrchestrator, RebuildReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOutcome {
    pub event: MutationEvent,
    pub report: RebuildReport,
}

impl EditOutcome {
    pub fn is_degraded(&self) -> bool {
        self.report.is_degraded()
    }
}

#[derive(Clone)]
pub struct EditService {
    store: Arc<dyn RecordStore>,
    orchestrator: RebuildOrchestrator,
}

impl EditService {
    pub fn new(store: Arc<dyn RecordStore>, orchestrator: RebuildOrchestrator) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &RebuildOrchestrator {
        &self.orchestrator
    }

    pub async fn submit(&self, change: EntityChange) -> Result<EditOutcome, StorageError> {
        let entity = change.entity();
        let event = match self.store.commit(change).await {
            Ok(event) => event,
            Err(e) => {
                warn!("Rejected {} change: {}", entity, e);
                return Err(e);
            }
        };

        let report = self.orchestrator.apply(&event).await;
        if report.is_degraded() {
            error!(
                entity = %event.entity,
                kind = %event.kind,
                id = ?event.entity_id(),
                stale = report.failed.len(),
                "Change committed but {} artifact(s) are stale; republish the failed buckets",
                report.failed.len()
            );
        }

        Ok(EditOutcome { event, report })
    }
}
