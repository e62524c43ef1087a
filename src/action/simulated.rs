//! Executor that fabricates outcomes from the action's own parameters.
//!
//! Used for dry runs, demos and tests. Recognised params:
//!
//! ```yaml
//! outcome: success        # success | failure | error | transient
//! fail_attempts: 2        # first N attempts fail transiently, then `outcome` applies
//! error: "EDR API returned 503"
//! summary: "isolated web-01"
//! impact: { exposure: -5 }
//! entries: [{ category: malware, severity: high }]
//! result: { ticket: "INC-1" }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use playbook_common::{ActionDescriptor, ActionOutcome, ImpactMetrics, OutcomeEntry};

use super::{ActionContext, ActionError, ActionExecutor};

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Simulated {
    #[default]
    Success,
    /// The action ran and reported `success: false`
    Failure,
    /// The action could not run at all
    Error,
    Transient,
}

#[derive(Debug, Deserialize, Default)]
struct SimulationParams {
    #[serde(default)]
    outcome: Simulated,
    #[serde(default)]
    fail_attempts: u32,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    impact: ImpactMetrics,
    #[serde(default)]
    entries: Vec<OutcomeEntry>,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExecutor;

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        action: &ActionDescriptor,
        ctx: &ActionContext<'_>,
    ) -> Result<ActionOutcome, ActionError> {
        let params: SimulationParams = if action.params.is_null() {
            SimulationParams::default()
        } else {
            serde_json::from_value(action.params.clone())
                .map_err(|e| ActionError::permanent(format!("invalid simulate params: {}", e)))?
        };
        let error = params
            .error
            .clone()
            .unwrap_or_else(|| format!("simulated failure of step '{}'", ctx.step_id));

        debug!(step_id = ctx.step_id, attempt = ctx.attempt, outcome = ?params.outcome, "simulating action");

        if ctx.attempt <= params.fail_attempts {
            return Err(ActionError::transient(error));
        }

        match params.outcome {
            Simulated::Success => Ok(ActionOutcome {
                success: true,
                result: params.result,
                impact: params.impact,
                entries: params.entries,
                summary: params.summary,
                error: None,
            }),
            Simulated::Failure => Ok(ActionOutcome {
                success: false,
                result: params.result,
                summary: params.summary,
                error: Some(error),
                ..Default::default()
            }),
            Simulated::Error => Err(ActionError::permanent(error)),
            Simulated::Transient => Err(ActionError::transient(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FailureKind;
    use playbook_common::{RunState, Severity};
    use serde_json::json;
    use uuid::Uuid;

    async fn run(params: serde_json::Value, attempt: u32) -> Result<ActionOutcome, ActionError> {
        let state = RunState::new();
        let ctx = ActionContext {
            run_id: Uuid::new_v4(),
            org_id: "acme",
            step_id: "isolate",
            attempt,
            state: &state,
        };
        SimulatedExecutor
            .execute(&ActionDescriptor::new("simulate", params), &ctx)
            .await
    }

    #[tokio::test]
    async fn test_success_carries_impact_and_entries() {
        let outcome = run(
            json!({
                "summary": "isolated web-01",
                "impact": { "exposure": -5 },
                "entries": [{ "category": "malware", "severity": "high" }]
            }),
            1,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.impact.get("exposure"), Some(&-5.0));
        assert!(outcome.has_entry("malware", Some(Severity::High)));
        assert_eq!(outcome.summary.as_deref(), Some("isolated web-01"));
    }

    #[tokio::test]
    async fn test_null_params_succeed() {
        assert!(run(serde_json::Value::Null, 1).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_reported_failure() {
        let outcome = run(json!({ "outcome": "failure", "error": "host not found" }), 1)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("host not found"));
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let err = run(json!({ "outcome": "error" }), 1).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
        assert!(err.message.contains("isolate"));

        let err = run(json!({ "outcome": "transient" }), 1).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Transient);
    }

    #[tokio::test]
    async fn test_fail_attempts_then_success() {
        let params = json!({ "fail_attempts": 2 });
        assert!(run(params.clone(), 1).await.unwrap_err().is_transient());
        assert!(run(params.clone(), 2).await.unwrap_err().is_transient());
        assert!(run(params, 3).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_invalid_params_are_permanent() {
        let err = run(json!({ "outcome": "maybe" }), 1).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Permanent);
    }
}
