//! Persistence boundary for playbooks, runs, step runs and audit events.
//!
//! Every read is scoped to an organization: a record belonging to another
//! org is indistinguishable from a missing one.
//!
//! Writes to a run go through [`RunStore::commit`], which applies the run row,
//! any step-run rows and the audit events of one engine step as a single
//! transaction guarded by optimistic checks.

mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use playbook_common::{
    AuditEvent, NewAuditEvent, PlaybookDefinition, Run, RunStatus, StepRun, StepRunStatus,
};

pub use sqlite::SqliteStore;

/// A step-run write guarded by the status the row had when it was read.
#[derive(Debug, Clone, Copy)]
pub struct StepWrite<'a> {
    pub step_run: &'a StepRun,
    pub expected_status: StepRunStatus,
}

impl<'a> StepWrite<'a> {
    pub fn new(step_run: &'a StepRun, expected_status: StepRunStatus) -> Self {
        Self {
            step_run,
            expected_status,
        }
    }
}

/// Writes applied together by [`RunStore::commit`].
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    /// Written only if the stored row still has `run.version` and `expected_status`
    pub run: &'a Run,
    pub expected_status: RunStatus,
    pub steps: &'a [StepWrite<'a>],
    /// Appended after the row writes, in order
    pub events: &'a [NewAuditEvent],
}

pub trait RunStore: Send + Sync {
    /// Insert or replace a playbook definition. Existing runs keep their snapshot.
    fn save_playbook(&self, playbook: &PlaybookDefinition) -> Result<()>;

    fn get_playbook(&self, org_id: &str, id: Uuid) -> Result<Option<PlaybookDefinition>>;

    fn list_playbooks(&self, org_id: &str) -> Result<Vec<PlaybookDefinition>>;

    /// Create a run together with all of its step runs and its first audit
    /// event, atomically.
    fn create_run(&self, run: &Run, step_runs: &[StepRun], started: &NewAuditEvent) -> Result<()>;

    fn get_run(&self, org_id: &str, id: Uuid) -> Result<Option<Run>>;

    /// Runs newest first, optionally filtered by status.
    fn list_runs(&self, org_id: &str, status: Option<RunStatus>) -> Result<Vec<Run>>;

    /// Initializing or running runs whose `scheduled_at` is unset or not after `now`.
    fn list_due_runs(&self, org_id: &str, now: DateTime<Utc>) -> Result<Vec<Run>>;

    /// Apply `commit` in one transaction. The stored run version is bumped.
    ///
    /// Returns `false` and writes nothing when the run or any step run no
    /// longer matches what the caller read. Terminal step runs are never
    /// rewritten.
    fn commit(&self, commit: &Commit<'_>) -> Result<bool>;

    /// Take or renew the advancer lease on a run until `until`.
    ///
    /// Succeeds when the run is unclaimed, its lease expired before `now`, or
    /// `holder` already holds it. Does not touch the run's version.
    fn claim_run(
        &self,
        org_id: &str,
        run_id: Uuid,
        holder: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drop the lease on a run if `holder` still owns it.
    fn release_run(&self, org_id: &str, run_id: Uuid, holder: Uuid) -> Result<()>;

    fn get_step_run(&self, org_id: &str, id: Uuid) -> Result<Option<StepRun>>;

    /// Step runs of a run in ascending position.
    fn list_step_runs(&self, org_id: &str, run_id: Uuid) -> Result<Vec<StepRun>>;

    /// Audit events of a run in append order.
    fn list_audit_events(&self, org_id: &str, run_id: Uuid) -> Result<Vec<AuditEvent>>;
}
