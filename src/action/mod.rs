//! Pluggable execution of step actions.
//!
//! The engine never interprets an `ActionDescriptor`; it hands it to an
//! `ActionExecutor` and records what comes back. `ExecutorRegistry` routes by
//! `ActionDescriptor::kind` so several executors can serve one engine.

mod simulated;
mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use playbook_common::{ActionDescriptor, ActionOutcome, RunState};

pub use simulated::SimulatedExecutor;
pub use webhook::WebhookExecutor;

/// Whether a failed action is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, unreachable services, throttling
    Transient,
    /// Bad input, rejected request, anything a retry will not fix
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// An action that could not produce an outcome.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    pub kind: FailureKind,
}

impl ActionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Transient,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

/// What an executor may see about the step it is running.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub run_id: Uuid,
    pub org_id: &'a str,
    pub step_id: &'a str,
    /// 1-based attempt number
    pub attempt: u32,
    pub state: &'a RunState,
}

/// Executes one step action. Implementations must be safe to call again for
/// the same step: a crash between execution and persistence re-runs it.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError>;
}

/// Routes actions to executors by kind.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
    fallback: Option<Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: &str, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executors.insert(kind.to_string(), executor);
        self
    }

    /// Executor used for kinds with no registration.
    pub fn with_fallback(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.fallback = Some(executor);
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// The built-in registry: `simulate` and `webhook`.
    pub fn builtin() -> anyhow::Result<Self> {
        Ok(Self::new()
            .register("simulate", Arc::new(SimulatedExecutor))
            .register("webhook", Arc::new(WebhookExecutor::new()?)))
    }
}

#[async_trait]
impl ActionExecutor for ExecutorRegistry {
    async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let executor = self
            .executors
            .get(&action.kind)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                ActionError::permanent(format!(
                    "no executor registered for action kind '{}'",
                    action.kind
                ))
            })?;
        executor.execute(action, ctx).await
    }
}
