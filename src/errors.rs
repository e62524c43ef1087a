//! Typed error hierarchy for the playbook engine.
//!
//! Two top-level enums cover the two failure domains:
//! - `DefinitionError`: a playbook that cannot be run as written
//! - `EngineError`: anything an engine operation reports to its caller

use thiserror::Error;
use uuid::Uuid;

use playbook_common::TransitionError;

/// Problems with a playbook definition, reported before any run record is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Playbook {id} not found")]
    PlaybookNotFound { id: Uuid },

    #[error("Playbook '{name}' has no steps")]
    NoSteps { name: String },

    #[error("Duplicate step id: {step}")]
    DuplicateStep { step: String },

    #[error("Unknown dependency '{dependency}' in step '{step}': no step with that id exists")]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' depends on itself")]
    SelfDependency { step: String },

    #[error("Cycle detected in step dependencies. Involved steps: {steps:?}")]
    Cycle { steps: Vec<String> },

    #[error("Invalid condition on step '{step}': {reason}")]
    InvalidCondition { step: String, reason: String },
}

/// Errors returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("Run {id} not found")]
    RunNotFound { id: Uuid },

    #[error("Step run {id} not found")]
    StepRunNotFound { id: Uuid },

    /// A precondition on the current status of a record was violated.
    #[error("Invalid state for {entity} {id}: expected {expected}, found {actual}")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Another advancer updated the run between our read and our write.
    #[error("Run {run_id} was modified concurrently")]
    Conflict { run_id: Uuid },

    #[error("Persistence error: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Persistence(_))
    }
}

/// Converts store results into `EngineError::Persistence`.
pub(crate) trait PersistenceExt<T> {
    fn persisted(self) -> Result<T, EngineError>;
}

impl<T> PersistenceExt<T> for anyhow::Result<T> {
    fn persisted(self) -> Result<T, EngineError> {
        self.map_err(EngineError::Persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_unknown_dependency_names_both_steps() {
        let err = DefinitionError::UnknownDependency {
            step: "contain".to_string(),
            dependency: "triage".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("contain"));
        assert!(msg.contains("triage"));
    }

    #[test]
    fn engine_error_converts_from_definition_error() {
        let err: EngineError = DefinitionError::NoSteps {
            name: "empty".to_string(),
        }
        .into();
        match &err {
            EngineError::Definition(DefinitionError::NoSteps { name }) => assert_eq!(name, "empty"),
            _ => panic!("Expected EngineError::Definition(NoSteps)"),
        }
    }

    #[test]
    fn invalid_state_carries_expected_and_actual() {
        let id = Uuid::new_v4();
        let err = EngineError::InvalidState {
            entity: "step run",
            id,
            expected: "ready".to_string(),
            actual: "pending".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ready"));
        assert!(msg.contains("pending"));
        assert!(msg.contains(&id.to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflict_and_persistence_are_retryable() {
        assert!(EngineError::Conflict { run_id: Uuid::new_v4() }.is_retryable());
        assert!(EngineError::Persistence(anyhow::anyhow!("disk full")).is_retryable());
    }

    #[test]
    fn persisted_maps_store_errors() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("locked"));
        let err = result.persisted().unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&DefinitionError::Cycle { steps: vec![] });
        assert_std_error(&EngineError::RunNotFound { id: Uuid::nil() });
    }
}
