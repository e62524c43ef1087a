//! Append-only audit events.
//!
//! Events are written once and never updated or deleted. Each one references a
//! run and optionally a step run, carries a type, a free-form payload and the
//! identity of the actor that caused it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor recorded for events produced by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RunStarted,
    StateChanged,
    ConditionEvaluated,
    StepReady,
    StepApproved,
    StepRejected,
    StepExecuted,
    StepSkipped,
    StepFailed,
    StepRetryScheduled,
    StepCancelled,
    NarrativeUnavailable,
    RunCompleted,
    RunFailed,
    RunCancelled,
    RunAborted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::StateChanged => "state_changed",
            Self::ConditionEvaluated => "condition_evaluated",
            Self::StepReady => "step_ready",
            Self::StepApproved => "step_approved",
            Self::StepRejected => "step_rejected",
            Self::StepExecuted => "step_executed",
            Self::StepSkipped => "step_skipped",
            Self::StepFailed => "step_failed",
            Self::StepRetryScheduled => "step_retry_scheduled",
            Self::StepCancelled => "step_cancelled",
            Self::NarrativeUnavailable => "narrative_unavailable",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::RunCancelled => "run_cancelled",
            Self::RunAborted => "run_aborted",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run_started" => Ok(Self::RunStarted),
            "state_changed" => Ok(Self::StateChanged),
            "condition_evaluated" => Ok(Self::ConditionEvaluated),
            "step_ready" => Ok(Self::StepReady),
            "step_approved" => Ok(Self::StepApproved),
            "step_rejected" => Ok(Self::StepRejected),
            "step_executed" => Ok(Self::StepExecuted),
            "step_skipped" => Ok(Self::StepSkipped),
            "step_failed" => Ok(Self::StepFailed),
            "step_retry_scheduled" => Ok(Self::StepRetryScheduled),
            "step_cancelled" => Ok(Self::StepCancelled),
            "narrative_unavailable" => Ok(Self::NarrativeUnavailable),
            "run_completed" => Ok(Self::RunCompleted),
            "run_failed" => Ok(Self::RunFailed),
            "run_cancelled" => Ok(Self::RunCancelled),
            "run_aborted" => Ok(Self::RunAborted),
            _ => Err(format!("Invalid audit event type: {}", s)),
        }
    }
}

/// A persisted audit event. `seq` is assigned by the store in append order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub seq: i64,
    pub run_id: Uuid,
    pub step_run_id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// An event about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub run_id: Uuid,
    pub step_run_id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub payload: serde_json::Value,
    pub actor: String,
}

impl NewAuditEvent {
    /// A run-level event attributed to the engine.
    pub fn run(run_id: Uuid, event_type: AuditEventType, payload: serde_json::Value) -> Self {
        Self {
            run_id,
            step_run_id: None,
            event_type,
            payload,
            actor: SYSTEM_ACTOR.to_string(),
        }
    }

    /// A step-level event attributed to the engine.
    pub fn step(
        run_id: Uuid,
        step_run_id: Uuid,
        event_type: AuditEventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            step_run_id: Some(step_run_id),
            ..Self::run(run_id, event_type, payload)
        }
    }

    pub fn by(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }
}
