//! Audit trail for runs.
//!
//! Audit events are appended by the store in the same transaction as the run
//! and step-run writes they describe. `AuditLog` reads the trail back and
//! mirrors committed events to tracing. `AuditExport` snapshots a run's trail
//! to a JSON file for hand-off outside the database.

mod logger;

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use playbook_common::{AuditEvent, NewAuditEvent};

use crate::errors::{EngineError, PersistenceExt};
use crate::store::RunStore;

pub use logger::{AuditExport, export_run};

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn RunStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// Mirror events that were just committed to tracing.
    pub fn committed(&self, events: &[NewAuditEvent]) {
        for event in events {
            debug!(
                run_id = %event.run_id,
                step_run_id = ?event.step_run_id,
                event_type = %event.event_type,
                actor = %event.actor,
                "audit"
            );
        }
    }

    pub fn events(&self, org_id: &str, run_id: Uuid) -> Result<Vec<AuditEvent>, EngineError> {
        self.store.list_audit_events(org_id, run_id).persisted()
    }
}
