//! Terminal rendering helpers shared by the CLI commands.

pub mod icons;

use console::{StyledObject, style};
use uuid::Uuid;

use playbook_common::{RunStatus, StepRunStatus};

pub fn run_status(status: RunStatus) -> StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        RunStatus::Completed => style(text).green(),
        RunStatus::Failed | RunStatus::Aborted => style(text).red(),
        RunStatus::Cancelled => style(text).dim(),
        RunStatus::AwaitingApproval => style(text).yellow(),
        RunStatus::Initializing | RunStatus::Running => style(text).cyan(),
    }
}

pub fn step_status(status: StepRunStatus) -> StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        StepRunStatus::Executed => style(text).green(),
        StepRunStatus::Failed => style(text).red(),
        StepRunStatus::Ready => style(text).yellow(),
        StepRunStatus::Skipped | StepRunStatus::Cancelled => style(text).dim(),
        StepRunStatus::Pending | StepRunStatus::Approved | StepRunStatus::Executing => {
            style(text).cyan()
        }
    }
}

/// First eight characters of an id, for tables.
pub fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// A score with one decimal, or `-` when the run was never finalized.
pub fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}", v))
}
