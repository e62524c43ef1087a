//! Shared domain types for the playbook run engine.
//!
//! Everything here is plain data plus the transition rules that guard it; the
//! engine, persistence and CLI live in the `playbook` crate.

pub mod audit;
pub mod definition;
pub mod outcome;
pub mod run;
pub mod state;
pub mod status;

pub use audit::{AuditEvent, AuditEventType, NewAuditEvent, SYSTEM_ACTOR};
pub use definition::{
    ActionDescriptor, CONDITION_ALWAYS, ConditionSpec, PlaybookDefinition, StepDefinition,
};
pub use outcome::{ActionOutcome, ImpactMetrics, OutcomeEntry, Severity};
pub use run::{Run, RunVariant, StepRun};
pub use state::RunState;
pub use status::{RunStatus, StepRunStatus, TransitionError};
