//! Run and step-run records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::definition::{PlaybookDefinition, StepDefinition};
use crate::outcome::ActionOutcome;
use crate::state::RunState;
use crate::status::{RunStatus, StepRunStatus, TransitionError};

/// Which call site started the run.
///
/// `Suite` runs expose the most recently completed step's outcome to the
/// condition evaluator as the implicit target of `outcome_match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunVariant {
    #[default]
    Playbook,
    Suite,
}

impl RunVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playbook => "playbook",
            Self::Suite => "suite",
        }
    }

    pub fn exposes_prior_outcome(&self) -> bool {
        matches!(self, Self::Suite)
    }
}

impl fmt::Display for RunVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playbook" => Ok(Self::Playbook),
            "suite" => Ok(Self::Suite),
            _ => Err(format!("Invalid run variant: {}", s)),
        }
    }
}

/// One execution instance of a playbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub org_id: String,
    pub playbook_id: Uuid,
    pub variant: RunVariant,
    pub status: RunStatus,
    /// Snapshot of the playbook taken when the run was created
    pub definition: PlaybookDefinition,
    pub state: RunState,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    /// Populated by the finalizer only
    pub risk_score: Option<f64>,
    /// Populated by the finalizer only
    pub confidence_score: Option<f64>,
    pub narrative: Option<String>,
    pub risk_graph: Option<serde_json::Value>,
    /// Failure or cancellation reason
    pub error: Option<String>,
    pub created_by: String,
    /// Earliest time the sweep may advance this run
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped on every persisted update
    pub version: i64,
}

impl Run {
    /// Create a run in `Initializing` from a snapshot of `definition`.
    pub fn new(
        definition: &PlaybookDefinition,
        variant: RunVariant,
        state: RunState,
        created_by: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id: definition.org_id.clone(),
            playbook_id: definition.id,
            variant,
            status: RunStatus::Initializing,
            definition: definition.clone(),
            state,
            steps_completed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            risk_score: None,
            confidence_score: None,
            narrative: None,
            risk_graph: None,
            error: None,
            created_by: created_by.to_string(),
            scheduled_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a validated status change, stamping `completed_at` on terminal statuses.
    pub fn set_status(&mut self, next: RunStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(next)?;
        let now = Utc::now();
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn step_definition(&self, step_id: &str) -> Option<&StepDefinition> {
        self.definition.step(step_id)
    }
}

/// The execution record of one step within one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRun {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_id: String,
    pub position: u32,
    pub status: StepRunStatus,
    pub ready_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub approver: Option<String>,
    pub approval_notes: Option<String>,
    pub outcome: Option<ActionOutcome>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub condition_evaluated: bool,
    pub condition_result: Option<bool>,
    pub condition_details: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl StepRun {
    /// A fresh `Pending` record for `step` within `run_id`.
    pub fn pending(run_id: Uuid, step: &StepDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            step_id: step.id.clone(),
            position: step.position,
            status: StepRunStatus::Pending,
            ready_at: None,
            approved_at: None,
            executed_at: None,
            approver: None,
            approval_notes: None,
            outcome: None,
            error: None,
            retry_count: 0,
            condition_evaluated: false,
            condition_result: None,
            condition_details: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a validated status change and stamp the matching timestamp.
    pub fn set_status(&mut self, next: StepRunStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(next)?;
        let now = Utc::now();
        self.updated_at = now;
        match next {
            StepRunStatus::Ready => self.ready_at = Some(now),
            StepRunStatus::Approved => self.approved_at = Some(now),
            StepRunStatus::Executed | StepRunStatus::Failed => self.executed_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ActionDescriptor;

    fn playbook() -> PlaybookDefinition {
        PlaybookDefinition::new(
            "acme",
            "containment",
            vec![StepDefinition::new("isolate", 1, ActionDescriptor::default())],
        )
    }

    #[test]
    fn test_new_run_snapshots_definition() {
        let definition = playbook();
        let run = Run::new(&definition, RunVariant::Playbook, RunState::new(), "alice");
        assert_eq!(run.status, RunStatus::Initializing);
        assert_eq!(run.definition, definition);
        assert_eq!(run.org_id, "acme");
        assert_eq!(run.version, 0);
        assert!(run.risk_score.is_none());
    }

    #[test]
    fn test_set_status_stamps_completion() {
        let mut run = Run::new(&playbook(), RunVariant::Playbook, RunState::new(), "alice");
        run.set_status(RunStatus::Running).unwrap();
        assert!(run.completed_at.is_none());
        run.set_status(RunStatus::Completed).unwrap();
        assert!(run.completed_at.is_some());
        assert!(run.set_status(RunStatus::Running).is_err());
    }

    #[test]
    fn test_step_run_stamps_timestamps() {
        let definition = playbook();
        let mut step = StepRun::pending(Uuid::new_v4(), &definition.steps[0]);
        step.set_status(StepRunStatus::Ready).unwrap();
        assert!(step.ready_at.is_some());
        step.set_status(StepRunStatus::Approved).unwrap();
        assert!(step.approved_at.is_some());
        step.set_status(StepRunStatus::Executing).unwrap();
        step.set_status(StepRunStatus::Executed).unwrap();
        assert!(step.executed_at.is_some());
        assert!(step.set_status(StepRunStatus::Pending).is_err());
    }

    #[test]
    fn test_variant_prior_outcome_exposure() {
        assert!(!RunVariant::Playbook.exposes_prior_outcome());
        assert!(RunVariant::Suite.exposes_prior_outcome());
        assert_eq!("suite".parse::<RunVariant>().unwrap(), RunVariant::Suite);
    }
}
