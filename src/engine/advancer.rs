//! Advancement passes.
//!
//! A pass takes the run's advancer lease, then scans step runs in ascending position and
//! admits every pending step whose dependencies are executed or skipped.
//! Scans repeat until one makes no progress. A pass stops early when a step
//! needs approval, a transient failure is waiting for a retry, or the run
//! fails.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use playbook_common::{
    AuditEventType, NewAuditEvent, Run, RunStatus, SYSTEM_ACTOR, StepDefinition, StepRun,
    StepRunStatus,
};

use crate::condition::{self, EvalContext, Evaluation};
use crate::dag::dependencies_satisfied;
use crate::errors::{DefinitionError, EngineError};
use crate::store::StepWrite;

use super::execution::StepExecution;
use super::{AdvanceResult, Engine};

/// Why a pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// No step could be admitted
    Idle,
    AwaitingApproval,
    RetryScheduled,
    Failed,
}

impl Engine {
    /// Run one advancement pass.
    ///
    /// A no-op for runs that are terminal, awaiting approval, or claimed by a
    /// concurrent advancer.
    #[instrument(skip(self), fields(org_id = %self.org_id))]
    pub async fn advance(&self, run_id: Uuid) -> Result<AdvanceResult, EngineError> {
        let run = self.load_run(run_id)?;
        if !run.status.is_advanceable() {
            debug!(status = %run.status, "run is not advanceable");
            return self.snapshot(run, Vec::new());
        }

        let Some(claim) = self.claim(run_id)? else {
            info!("run is claimed by another advancer; skipping pass");
            return self.snapshot(run, Vec::new());
        };
        let result = self.advance_claimed(run_id, claim).await;
        self.release(run_id, claim);
        result
    }

    async fn advance_claimed(&self, run_id: Uuid, claim: Uuid) -> Result<AdvanceResult, EngineError> {
        // Another advancer may have moved the run between the first read and the claim.
        let mut run = self.load_run(run_id)?;
        if !run.status.is_advanceable() {
            return self.snapshot(run, Vec::new());
        }
        if run.status != RunStatus::Running {
            self.transition(&mut run, RunStatus::Running, SYSTEM_ACTOR, &[], Vec::new())?;
        }

        let mut processed = Vec::new();
        let outcome = self.run_pass(&mut run, claim, &mut processed).await?;
        debug!(?outcome, processed = processed.len(), "pass finished");
        self.conclude(run, processed).await
    }

    pub(crate) async fn run_pass(
        &self,
        run: &mut Run,
        claim: Uuid,
        processed: &mut Vec<StepRun>,
    ) -> Result<PassOutcome, EngineError> {
        let mut steps = self.load_steps(run.id)?;
        let mut statuses: HashMap<String, StepRunStatus> = steps
            .iter()
            .map(|s| (s.step_id.clone(), s.status))
            .collect();

        loop {
            let mut progressed = false;

            for step_run in steps.iter_mut() {
                if step_run.is_terminal() {
                    continue;
                }
                let step = run
                    .step_definition(&step_run.step_id)
                    .cloned()
                    .ok_or_else(|| {
                        anyhow!(
                            "step '{}' is missing from the run's definition snapshot",
                            step_run.step_id
                        )
                    })?;

                match step_run.status {
                    StepRunStatus::Ready => {
                        // Approval was requested but the run was never suspended.
                        self.transition(
                            run,
                            RunStatus::AwaitingApproval,
                            SYSTEM_ACTOR,
                            &[],
                            Vec::new(),
                        )?;
                        return Ok(PassOutcome::AwaitingApproval);
                    }
                    // Interrupted before the outcome was recorded: execute again.
                    StepRunStatus::Approved | StepRunStatus::Executing => {}
                    StepRunStatus::Pending => {
                        if !dependencies_satisfied(&step, &statuses) {
                            continue;
                        }
                        if step.has_gating_condition() && step_run.condition_result != Some(true) {
                            let evaluation = self.evaluate_condition(run, step_run, &step)?;
                            if !evaluation.met {
                                self.skip_unmet(run, step_run)?;
                                statuses.insert(step_run.step_id.clone(), step_run.status);
                                processed.push(step_run.clone());
                                progressed = true;
                                continue;
                            }
                        }
                        if step.requires_approval && step_run.approved_at.is_none() {
                            self.request_approval(run, step_run)?;
                            statuses.insert(step_run.step_id.clone(), step_run.status);
                            processed.push(step_run.clone());
                            return Ok(PassOutcome::AwaitingApproval);
                        }
                    }
                    _ => continue,
                }

                let execution = self.execute_step(run, step_run, &step, claim).await?;
                statuses.insert(step_run.step_id.clone(), step_run.status);
                processed.push(step_run.clone());
                match execution {
                    StepExecution::Executed | StepExecution::Skipped => progressed = true,
                    StepExecution::RetryScheduled => return Ok(PassOutcome::RetryScheduled),
                    StepExecution::RunFailed => return Ok(PassOutcome::Failed),
                }
            }

            if !progressed {
                return Ok(PassOutcome::Idle);
            }
        }
    }

    /// Finalize the run if every step run is terminal, then report.
    pub(crate) async fn conclude(
        &self,
        mut run: Run,
        processed: Vec<StepRun>,
    ) -> Result<AdvanceResult, EngineError> {
        if run.status == RunStatus::Running {
            let steps = self.load_steps(run.id)?;
            if steps.iter().all(StepRun::is_terminal) {
                self.finalize_run(&mut run, &steps).await?;
            }
        }
        self.snapshot(run, processed)
    }

    fn evaluate_condition(
        &self,
        run: &mut Run,
        step_run: &mut StepRun,
        step: &StepDefinition,
    ) -> Result<Evaluation, EngineError> {
        let Some(spec) = step.condition.as_ref() else {
            return Err(anyhow!("step '{}' has no condition to evaluate", step.id).into());
        };

        let mut ctx = EvalContext::new(&run.state);
        if run.variant.exposes_prior_outcome() {
            ctx = ctx.with_prior_outcome();
        }
        let evaluation =
            condition::evaluate(spec, &ctx).map_err(|e| DefinitionError::InvalidCondition {
                step: step.id.clone(),
                reason: e.to_string(),
            })?;

        step_run.condition_evaluated = true;
        step_run.condition_result = Some(evaluation.met);
        step_run.condition_details = Some(evaluation.details.clone());
        step_run.updated_at = Utc::now();

        debug!(step_id = %step.id, condition = %spec.condition_type, met = evaluation.met, "condition evaluated");
        let event = NewAuditEvent::step(
            run.id,
            step_run.id,
            AuditEventType::ConditionEvaluated,
            json!({
                "step_id": step.id,
                "condition_type": spec.condition_type,
                "met": evaluation.met,
                "details": &evaluation.details,
            }),
        );
        self.save(run, &[StepWrite::new(step_run, StepRunStatus::Pending)], vec![event])?;
        Ok(evaluation)
    }

    fn skip_unmet(&self, run: &mut Run, step_run: &mut StepRun) -> Result<(), EngineError> {
        step_run.set_status(StepRunStatus::Skipped)?;
        run.steps_skipped += 1;

        info!(step_id = %step_run.step_id, "condition not met; step skipped");
        let event = NewAuditEvent::step(
            run.id,
            step_run.id,
            AuditEventType::StepSkipped,
            json!({ "step_id": step_run.step_id, "reason": "condition_not_met" }),
        );
        self.save(run, &[StepWrite::new(step_run, StepRunStatus::Pending)], vec![event])
    }

    fn request_approval(&self, run: &mut Run, step_run: &mut StepRun) -> Result<(), EngineError> {
        step_run.set_status(StepRunStatus::Ready)?;
        let event = NewAuditEvent::step(
            run.id,
            step_run.id,
            AuditEventType::StepReady,
            json!({ "step_id": step_run.step_id }),
        );

        info!(step_id = %step_run.step_id, step_run_id = %step_run.id, "step awaiting approval");
        self.transition(
            run,
            RunStatus::AwaitingApproval,
            SYSTEM_ACTOR,
            &[StepWrite::new(step_run, StepRunStatus::Pending)],
            vec![event],
        )
    }
}
