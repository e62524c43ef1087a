//! Human approval gate.
//!
//! A step that requires approval parks the run in `AwaitingApproval` with the
//! step `Ready`. A decision on that step resumes the run: approval executes
//! the step, rejection skips it, and in both cases the advancer continues with
//! whatever became admissible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use playbook_common::{
    AuditEventType, NewAuditEvent, Run, RunStatus, StepDefinition, StepRun, StepRunStatus,
};

use crate::errors::{EngineError, PersistenceExt};
use crate::store::StepWrite;

use super::execution::StepExecution;
use super::{AdvanceResult, Engine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// The decided step and the state of the run after resuming it.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub step_run: StepRun,
    pub advance: AdvanceResult,
}

impl Engine {
    /// Approve or reject a ready step and resume its run.
    ///
    /// Fails with `InvalidState` and changes nothing unless the step is
    /// `Ready` and its run is `AwaitingApproval`.
    #[instrument(skip(self, notes), fields(org_id = %self.org_id))]
    pub async fn decide(
        &self,
        step_run_id: Uuid,
        decision: Decision,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<DecisionResult, EngineError> {
        let step_run = self
            .store
            .get_step_run(&self.org_id, step_run_id)
            .persisted()?
            .ok_or(EngineError::StepRunNotFound { id: step_run_id })?;
        if step_run.status != StepRunStatus::Ready {
            return Err(EngineError::InvalidState {
                entity: "step run",
                id: step_run.id,
                expected: StepRunStatus::Ready.to_string(),
                actual: step_run.status.to_string(),
            });
        }

        let run = self.load_run(step_run.run_id)?;
        if run.status != RunStatus::AwaitingApproval {
            return Err(EngineError::InvalidState {
                entity: "run",
                id: run.id,
                expected: RunStatus::AwaitingApproval.to_string(),
                actual: run.status.to_string(),
            });
        }
        let step = run
            .step_definition(&step_run.step_id)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "step '{}' is missing from the run's definition snapshot",
                    step_run.step_id
                )
            })?;

        // A concurrent decision or advancer holding the run loses here.
        let run_id = run.id;
        let Some(claim) = self.claim(run_id)? else {
            return Err(EngineError::Conflict { run_id });
        };
        let result = self
            .resume(run, step_run, &step, decision, notes, actor, claim)
            .await;
        self.release(run_id, claim);
        result
    }

    /// Commit the decision together with resuming the run, then continue it.
    #[allow(clippy::too_many_arguments)]
    async fn resume(
        &self,
        mut run: Run,
        mut step_run: StepRun,
        step: &StepDefinition,
        decision: Decision,
        notes: Option<&str>,
        actor: &str,
        claim: Uuid,
    ) -> Result<DecisionResult, EngineError> {
        step_run.approver = Some(actor.to_string());
        step_run.approval_notes = notes.map(str::to_string);
        let mut processed = Vec::new();

        match decision {
            Decision::Approve => {
                step_run.set_status(StepRunStatus::Approved)?;
                let event = NewAuditEvent::step(
                    run.id,
                    step_run.id,
                    AuditEventType::StepApproved,
                    json!({ "step_id": step_run.step_id, "notes": notes }),
                )
                .by(actor);
                self.transition(
                    &mut run,
                    RunStatus::Running,
                    actor,
                    &[StepWrite::new(&step_run, StepRunStatus::Ready)],
                    vec![event],
                )?;
                info!(step_id = %step_run.step_id, actor, "step approved");

                let execution = self.execute_step(&mut run, &mut step_run, step, claim).await?;
                processed.push(step_run.clone());
                if matches!(execution, StepExecution::Executed | StepExecution::Skipped) {
                    self.run_pass(&mut run, claim, &mut processed).await?;
                }
            }
            Decision::Reject => {
                step_run.set_status(StepRunStatus::Skipped)?;
                run.steps_skipped += 1;
                let event = NewAuditEvent::step(
                    run.id,
                    step_run.id,
                    AuditEventType::StepRejected,
                    json!({ "step_id": step_run.step_id, "notes": notes }),
                )
                .by(actor);
                self.transition(
                    &mut run,
                    RunStatus::Running,
                    actor,
                    &[StepWrite::new(&step_run, StepRunStatus::Ready)],
                    vec![event],
                )?;
                info!(step_id = %step_run.step_id, actor, "step rejected");

                processed.push(step_run.clone());
                self.run_pass(&mut run, claim, &mut processed).await?;
            }
        }

        let advance = self.conclude(run, processed).await?;
        Ok(DecisionResult { step_run, advance })
    }
}
