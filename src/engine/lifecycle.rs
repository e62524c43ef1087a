//! Playbook registration, run creation, termination and queries.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use playbook_common::{
    AuditEvent, AuditEventType, NewAuditEvent, PlaybookDefinition, Run, RunStatus, StepRun,
};

use crate::dag;
use crate::errors::{DefinitionError, EngineError, PersistenceExt};
use crate::store::StepWrite;

use super::{Engine, RunDetail, StartRun, SweepFailure, SweepReport};

impl Engine {
    /// Validate and store a playbook under this engine's organization.
    ///
    /// Re-registering an existing id replaces the definition; runs already
    /// started keep the snapshot they were created with.
    #[instrument(skip(self, definition), fields(org_id = %self.org_id, playbook = %definition.name))]
    pub fn register_playbook(
        &self,
        mut definition: PlaybookDefinition,
    ) -> Result<PlaybookDefinition, EngineError> {
        definition.org_id = self.org_id.clone();
        dag::validate(&definition)?;
        self.store.save_playbook(&definition).persisted()?;
        info!(playbook_id = %definition.id, steps = definition.steps.len(), "playbook registered");
        Ok(definition)
    }

    /// Create a run of a stored playbook with one pending step run per step.
    ///
    /// Nothing is written if the playbook does not validate.
    #[instrument(skip(self, params), fields(org_id = %self.org_id))]
    pub fn start_run(&self, playbook_id: Uuid, params: StartRun) -> Result<Run, EngineError> {
        let definition = self
            .store
            .get_playbook(&self.org_id, playbook_id)
            .persisted()?
            .ok_or(DefinitionError::PlaybookNotFound { id: playbook_id })?;
        dag::validate(&definition)?;

        let mut run = Run::new(
            &definition,
            params.variant,
            params.initial_state,
            &params.created_by,
        );
        run.scheduled_at = params.scheduled_at;
        let step_runs: Vec<StepRun> = definition
            .ordered_steps()
            .into_iter()
            .map(|step| StepRun::pending(run.id, step))
            .collect();

        let started = NewAuditEvent::run(
            run.id,
            AuditEventType::RunStarted,
            json!({
                "playbook_id": definition.id,
                "playbook_name": definition.name,
                "variant": run.variant,
                "steps": step_runs.len(),
            }),
        )
        .by(&params.created_by);
        self.store
            .create_run(&run, &step_runs, &started)
            .persisted()?;
        self.audit.committed(std::slice::from_ref(&started));

        info!(run_id = %run.id, playbook_id = %definition.id, variant = %run.variant, "run started");
        Ok(run)
    }

    /// Cancel a non-terminal run at a user's request.
    ///
    /// Does not wait for an advancer's lease: an in-flight step outcome that
    /// lands after the cancellation is rejected as a conflict.
    pub fn cancel(&self, run_id: Uuid, reason: &str, actor: &str) -> Result<Run, EngineError> {
        self.terminate(run_id, RunStatus::Cancelled, reason, actor)
    }

    /// Force-terminate a non-terminal run.
    pub fn abort(&self, run_id: Uuid, reason: &str, actor: &str) -> Result<Run, EngineError> {
        self.terminate(run_id, RunStatus::Aborted, reason, actor)
    }

    #[instrument(skip(self), fields(org_id = %self.org_id))]
    fn terminate(
        &self,
        run_id: Uuid,
        status: RunStatus,
        reason: &str,
        actor: &str,
    ) -> Result<Run, EngineError> {
        let mut run = self.load_run(run_id)?;
        if run.is_terminal() {
            return Err(EngineError::InvalidState {
                entity: "run",
                id: run.id,
                expected: "a non-terminal status".to_string(),
                actual: run.status.to_string(),
            });
        }

        run.error = Some(reason.to_string());
        let mut cancelled = self.cancel_open_steps(run.id, None, actor, reason)?;
        let event_type = if status == RunStatus::Aborted {
            AuditEventType::RunAborted
        } else {
            AuditEventType::RunCancelled
        };
        let mut events = std::mem::take(&mut cancelled.events);
        events.push(
            NewAuditEvent::run(
                run.id,
                event_type,
                json!({ "reason": reason, "steps_cancelled": cancelled.steps.len() }),
            )
            .by(actor),
        );
        let writes: Vec<StepWrite<'_>> = cancelled.writes().collect();
        // Run status, step cancellations and events commit together; a step
        // that moved since it was read aborts the whole termination.
        self.transition(&mut run, status, actor, &writes, events)?;

        warn!(run_id = %run.id, status = %run.status, reason, actor, "run terminated");
        Ok(run)
    }

    /// Advance every run that is due at `now`.
    ///
    /// A failure on one run is reported and does not stop the sweep.
    #[instrument(skip(self), fields(org_id = %self.org_id))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let due = self.store.list_due_runs(&self.org_id, now).persisted()?;
        let mut report = SweepReport::default();

        for run in due {
            match self.advance(run.id).await {
                Ok(result) => report.advanced.push(result),
                Err(err) => {
                    warn!(run_id = %run.id, error = %err, "sweep failed to advance run");
                    report.failures.push(SweepFailure {
                        run_id: run.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            advanced = report.advanced.len(),
            failed = report.failures.len(),
            "sweep finished"
        );
        Ok(report)
    }

    pub fn get_run(&self, run_id: Uuid) -> Result<RunDetail, EngineError> {
        let run = self.load_run(run_id)?;
        let steps = self.load_steps(run.id)?;
        Ok(RunDetail { run, steps })
    }

    pub fn list_runs(&self, status: Option<RunStatus>) -> Result<Vec<Run>, EngineError> {
        self.store.list_runs(&self.org_id, status).persisted()
    }

    pub fn get_playbook(&self, playbook_id: Uuid) -> Result<PlaybookDefinition, EngineError> {
        Ok(self
            .store
            .get_playbook(&self.org_id, playbook_id)
            .persisted()?
            .ok_or(DefinitionError::PlaybookNotFound { id: playbook_id })?)
    }

    pub fn list_playbooks(&self) -> Result<Vec<PlaybookDefinition>, EngineError> {
        self.store.list_playbooks(&self.org_id).persisted()
    }

    /// Audit trail of a run in append order.
    pub fn audit_events(&self, run_id: Uuid) -> Result<Vec<AuditEvent>, EngineError> {
        let run = self.load_run(run_id)?;
        self.audit.events(&self.org_id, run.id)
    }
}
