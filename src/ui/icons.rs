//! Shared UI icons.
//!
//! Each icon falls back to plain ASCII when the terminal cannot render emoji.

use console::Emoji;

use playbook_common::{RunStatus, StepRunStatus};

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");

// Run and step indicators
pub static PENDING: Emoji<'_, '_> = Emoji("⏳ ", "[ ]");
pub static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static GATE: Emoji<'_, '_> = Emoji("🚧 ", "[?]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[-]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[X]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");

// File indicators
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static FILE_NEW: Emoji<'_, '_> = Emoji("📄 ", "+");

pub fn run_icon(status: RunStatus) -> &'static Emoji<'static, 'static> {
    match status {
        RunStatus::Initializing => &PENDING,
        RunStatus::Running => &RUNNING,
        RunStatus::AwaitingApproval => &GATE,
        RunStatus::Completed => &CHECK,
        RunStatus::Failed => &CROSS,
        RunStatus::Cancelled | RunStatus::Aborted => &STOP,
    }
}

pub fn step_icon(status: StepRunStatus) -> &'static Emoji<'static, 'static> {
    match status {
        StepRunStatus::Pending => &PENDING,
        StepRunStatus::Ready => &GATE,
        StepRunStatus::Approved | StepRunStatus::Executing => &RUNNING,
        StepRunStatus::Executed => &CHECK,
        StepRunStatus::Skipped => &SKIP,
        StepRunStatus::Failed => &CROSS,
        StepRunStatus::Cancelled => &STOP,
    }
}
