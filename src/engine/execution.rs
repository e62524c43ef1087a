//! Step execution and failure handling.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use playbook_common::{
    AuditEventType, NewAuditEvent, Run, SYSTEM_ACTOR, StepDefinition, StepRun, StepRunStatus,
};

use crate::action::{ActionContext, ActionError};
use crate::errors::EngineError;
use crate::store::StepWrite;

use super::Engine;

/// What happened to a step handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepExecution {
    Executed,
    /// Failed, but the step allows the run to continue without it
    Skipped,
    /// Failed transiently; the step is pending again
    RetryScheduled,
    /// Failed permanently; the run has been finalized as failed
    RunFailed,
}

impl Engine {
    /// Execute one step while holding the run's advancer lease.
    ///
    /// The step is committed as `Executing` before the action runs and its
    /// outcome is committed together with the run's counters and state. A
    /// step already `Executing` is only reached by an advancer that took over
    /// an expired lease, and is executed again.
    pub(crate) async fn execute_step(
        &self,
        run: &mut Run,
        step_run: &mut StepRun,
        step: &StepDefinition,
        claim: Uuid,
    ) -> Result<StepExecution, EngineError> {
        self.renew(run.id, claim)?;
        let prior = step_run.status;
        if prior == StepRunStatus::Executing {
            step_run.updated_at = Utc::now();
        } else {
            step_run.set_status(StepRunStatus::Executing)?;
        }
        self.save(run, &[StepWrite::new(step_run, prior)], Vec::new())?;

        let attempt = step_run.retry_count + 1;
        let result = {
            let ctx = ActionContext {
                run_id: run.id,
                org_id: &run.org_id,
                step_id: &step.id,
                attempt,
                state: &run.state,
            };
            info!(step_id = %step.id, kind = %step.action.kind, attempt, "executing step");
            self.executor.execute(&step.action, &ctx).await
        };

        let outcome = match result {
            Ok(outcome) if outcome.success => outcome,
            Ok(outcome) => {
                let message = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| "action reported failure".to_string());
                return self
                    .handle_failure(run, step_run, step, ActionError::permanent(message))
                    .await;
            }
            Err(err) => return self.handle_failure(run, step_run, step, err).await,
        };

        step_run.set_status(StepRunStatus::Executed)?;
        step_run.error = None;
        step_run.outcome = Some(outcome.clone());

        run.state.record_outcome(&step.id, &outcome);
        run.steps_completed += 1;
        if let Some(minutes) = step.wait_duration_minutes.filter(|m| *m > 0) {
            run.scheduled_at = Some(Utc::now() + Duration::minutes(i64::from(minutes)));
        }

        let event = NewAuditEvent::step(
            run.id,
            step_run.id,
            AuditEventType::StepExecuted,
            json!({
                "step_id": step.id,
                "attempt": attempt,
                "impact": outcome.impact,
                "summary": outcome.summary,
            }),
        );
        self.save(
            run,
            &[StepWrite::new(step_run, StepRunStatus::Executing)],
            vec![event],
        )?;
        Ok(StepExecution::Executed)
    }

    async fn handle_failure(
        &self,
        run: &mut Run,
        step_run: &mut StepRun,
        step: &StepDefinition,
        err: ActionError,
    ) -> Result<StepExecution, EngineError> {
        step_run.retry_count += 1;
        step_run.error = Some(err.message.clone());

        if err.is_transient() && self.retry.allows_retry(step_run.retry_count) {
            step_run.set_status(StepRunStatus::Pending)?;
            warn!(step_id = %step.id, attempt = step_run.retry_count, error = %err, "transient failure; retry scheduled");
            let event = NewAuditEvent::step(
                run.id,
                step_run.id,
                AuditEventType::StepRetryScheduled,
                json!({
                    "step_id": step.id,
                    "attempt": step_run.retry_count,
                    "max_attempts": self.retry.max_attempts,
                    "error": err.message,
                }),
            );
            self.save(
                run,
                &[StepWrite::new(step_run, StepRunStatus::Executing)],
                vec![event],
            )?;
            return Ok(StepExecution::RetryScheduled);
        }

        if step.skip_on_failure {
            step_run.set_status(StepRunStatus::Skipped)?;
            run.steps_skipped += 1;
            warn!(step_id = %step.id, error = %err, "step failed; skipping");
            let event = NewAuditEvent::step(
                run.id,
                step_run.id,
                AuditEventType::StepSkipped,
                json!({
                    "step_id": step.id,
                    "reason": "skip_on_failure",
                    "error": err.message,
                }),
            );
            self.save(
                run,
                &[StepWrite::new(step_run, StepRunStatus::Executing)],
                vec![event],
            )?;
            return Ok(StepExecution::Skipped);
        }

        step_run.set_status(StepRunStatus::Failed)?;
        run.steps_failed += 1;
        run.error = Some(format!("step '{}' failed: {}", step.id, err.message));
        warn!(step_id = %step.id, kind = err.kind.as_str(), error = %err, "step failed; failing run");

        let mut cancelled =
            self.cancel_open_steps(run.id, Some(step_run.id), SYSTEM_ACTOR, "run_failed")?;
        let mut events = vec![NewAuditEvent::step(
            run.id,
            step_run.id,
            AuditEventType::StepFailed,
            json!({
                "step_id": step.id,
                "error": err.message,
                "failure_kind": err.kind,
                "attempts": step_run.retry_count,
            }),
        )];
        events.append(&mut cancelled.events);
        let writes: Vec<StepWrite<'_>> =
            std::iter::once(StepWrite::new(step_run, StepRunStatus::Executing))
                .chain(cancelled.writes())
                .collect();
        self.save(run, &writes, events)?;

        let steps = self.load_steps(run.id)?;
        self.finalize_run(run, &steps).await?;
        Ok(StepExecution::RunFailed)
    }
}
