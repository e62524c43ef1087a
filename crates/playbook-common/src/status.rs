//! Run and step-run status enums with their allowed transitions.
//!
//! Valid run transitions:
//! - `Initializing` -> `Running` | `Cancelled` | `Aborted`
//! - `Running` -> `Running` | `AwaitingApproval` | `Completed` | `Failed` | `Cancelled` | `Aborted`
//! - `AwaitingApproval` -> `Running` | `Cancelled` | `Aborted`
//!
//! Valid step-run transitions:
//! - `Pending` -> `Ready` | `Executing` | `Skipped` | `Cancelled`
//! - `Ready` -> `Approved` | `Skipped` | `Cancelled`
//! - `Approved` -> `Executing` | `Cancelled`
//! - `Executing` -> `Executed` | `Failed` | `Skipped` | `Pending` | `Cancelled`
//!
//! Terminal statuses never transition again.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A status change that the transition table does not allow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {entity} transition from '{from}' to '{to}'")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but no pass has started yet
    #[default]
    Initializing,
    /// An advancer may admit steps
    Running,
    /// Suspended on a ready step until a human decides
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
    /// Forced termination by the system
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Aborted => "aborted",
        }
    }

    /// Check if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Aborted
        )
    }

    /// Whether an advancer is allowed to run a pass in this status.
    pub fn is_advanceable(&self) -> bool {
        matches!(self, Self::Initializing | Self::Running)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::{Aborted, AwaitingApproval, Cancelled, Completed, Failed, Initializing, Running};
        match self {
            Initializing => matches!(next, Running | Cancelled | Aborted),
            Running => matches!(
                next,
                Running | AwaitingApproval | Completed | Failed | Cancelled | Aborted
            ),
            AwaitingApproval => matches!(next, Running | Cancelled | Aborted),
            Completed | Failed | Cancelled | Aborted => false,
        }
    }

    /// Validate a transition, returning the target status on success.
    pub fn transition(&self, next: RunStatus) -> Result<RunStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                entity: "run",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "running" => Ok(Self::Running),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Status of one step's execution record within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepRunStatus {
    /// Waiting for dependencies or for a pass to admit it
    #[default]
    Pending,
    /// Suspended for approval
    Ready,
    /// Approved, execution not yet started
    Approved,
    Executing,
    Executed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Approved => "approved",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if the step run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Whether dependents of a step in this status may proceed.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Executed | Self::Skipped)
    }

    pub fn can_transition_to(&self, next: StepRunStatus) -> bool {
        use StepRunStatus::{Approved, Cancelled, Executed, Executing, Failed, Pending, Ready, Skipped};
        match self {
            Pending => matches!(next, Ready | Executing | Skipped | Cancelled),
            Ready => matches!(next, Approved | Skipped | Cancelled),
            Approved => matches!(next, Executing | Cancelled),
            Executing => matches!(next, Executed | Failed | Skipped | Pending | Cancelled),
            Executed | Failed | Skipped | Cancelled => false,
        }
    }

    /// Validate a transition, returning the target status on success.
    pub fn transition(&self, next: StepRunStatus) -> Result<StepRunStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError {
                entity: "step run",
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for StepRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "approved" => Ok(Self::Approved),
            "executing" => Ok(Self::Executing),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid step run status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Initializing.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::AwaitingApproval.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_run_status_roundtrips_through_str() {
        for status in [
            RunStatus::Initializing,
            RunStatus::Running,
            RunStatus::AwaitingApproval,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_terminal_run_never_transitions() {
        let err = RunStatus::Completed
            .transition(RunStatus::Running)
            .unwrap_err();
        assert_eq!(err.from, "completed");
        assert_eq!(err.to, "running");
        assert!(err.to_string().contains("run"));
    }

    #[test]
    fn test_awaiting_approval_cannot_complete_directly() {
        assert!(!RunStatus::AwaitingApproval.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::AwaitingApproval.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn test_step_run_transitions() {
        assert!(StepRunStatus::Pending.can_transition_to(StepRunStatus::Ready));
        assert!(StepRunStatus::Ready.can_transition_to(StepRunStatus::Approved));
        assert!(StepRunStatus::Executing.can_transition_to(StepRunStatus::Pending));
        assert!(!StepRunStatus::Pending.can_transition_to(StepRunStatus::Executed));
        assert!(!StepRunStatus::Ready.can_transition_to(StepRunStatus::Executing));
        for terminal in [
            StepRunStatus::Executed,
            StepRunStatus::Failed,
            StepRunStatus::Skipped,
            StepRunStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(terminal.transition(StepRunStatus::Pending).is_err());
        }
    }

    #[test]
    fn test_only_executed_and_skipped_satisfy_dependents() {
        assert!(StepRunStatus::Executed.satisfies_dependents());
        assert!(StepRunStatus::Skipped.satisfies_dependents());
        assert!(!StepRunStatus::Failed.satisfies_dependents());
        assert!(!StepRunStatus::Cancelled.satisfies_dependents());
        assert!(!StepRunStatus::Ready.satisfies_dependents());
    }
}
