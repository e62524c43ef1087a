//! Playbook and step definitions.
//!
//! A `PlaybookDefinition` is the immutable blueprint a run executes. Runs keep
//! their own snapshot of it, so edits to a stored playbook never leak into
//! instances that are already in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Condition type that is trivially met.
pub const CONDITION_ALWAYS: &str = "always";

/// An ordered, dependency-linked set of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybookDefinition {
    /// Unique identifier of the playbook
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Tenant the playbook belongs to
    #[serde(default)]
    pub org_id: String,
    /// Human-readable name
    pub name: String,
    /// Optional free-form description
    #[serde(default)]
    pub description: String,
    /// Step definitions, in any order (sorted by `position` on use)
    pub steps: Vec<StepDefinition>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PlaybookDefinition {
    pub fn new(org_id: &str, name: &str, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            steps,
            created_at: Utc::now(),
        }
    }

    /// Look up a step by its stable identifier.
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Steps sorted by ascending ordinal position.
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.position);
        steps
    }
}

/// One step of a playbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Stable identifier, unique within the playbook
    pub id: String,
    /// Ordinal position used to order candidates within a pass
    pub position: u32,
    /// Display name (defaults to the identifier)
    #[serde(default)]
    pub name: String,
    /// Opaque payload interpreted by the action executor
    pub action: ActionDescriptor,
    /// Identifiers of steps that must finish before this one
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional trigger condition gating execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub skip_on_failure: bool,
    /// Reserved for an outer scheduler; not enforced by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_duration_minutes: Option<u32>,
    /// Reserved for an outer scheduler; not enforced by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
}

impl StepDefinition {
    /// Create a step with the given id, position and action, everything else defaulted.
    pub fn new(id: &str, position: u32, action: ActionDescriptor) -> Self {
        Self {
            id: id.to_string(),
            position,
            name: id.to_string(),
            action,
            depends_on: Vec::new(),
            condition: None,
            requires_approval: false,
            skip_on_failure: false,
            wait_duration_minutes: None,
            timeout_minutes: None,
        }
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_condition(mut self, condition: ConditionSpec) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn with_skip_on_failure(mut self, skip_on_failure: bool) -> Self {
        self.skip_on_failure = skip_on_failure;
        self
    }

    /// Whether the step carries a condition that needs evaluating.
    pub fn has_gating_condition(&self) -> bool {
        self.condition
            .as_ref()
            .is_some_and(|c| c.condition_type != CONDITION_ALWAYS)
    }
}

/// What a step does. `kind` routes to an executor; `params` is passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionDescriptor {
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ActionDescriptor {
    pub fn new(kind: &str, params: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            params,
        }
    }
}

/// Declarative trigger condition as written in a playbook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionSpec {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ConditionSpec {
    pub fn new(condition_type: &str, params: serde_json::Value) -> Self {
        Self {
            condition_type: condition_type.to_string(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ordered_steps_sorts_by_position() {
        let playbook = PlaybookDefinition::new(
            "acme",
            "triage",
            vec![
                StepDefinition::new("c", 3, ActionDescriptor::default()),
                StepDefinition::new("a", 1, ActionDescriptor::default()),
                StepDefinition::new("b", 2, ActionDescriptor::default()),
            ],
        );
        let ids: Vec<&str> = playbook.ordered_steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_always_condition_is_not_gating() {
        let step = StepDefinition::new("a", 1, ActionDescriptor::default())
            .with_condition(ConditionSpec::new(CONDITION_ALWAYS, json!({})));
        assert!(!step.has_gating_condition());

        let step = step.with_condition(ConditionSpec::new("metric_threshold", json!({})));
        assert!(step.has_gating_condition());
    }

    #[test]
    fn test_step_deserializes_with_defaults() {
        let yaml_like = json!({
            "id": "notify",
            "position": 2,
            "action": { "kind": "simulate" },
            "condition": { "type": "keyword_match", "params": { "keywords": ["breach"] } }
        });
        let step: StepDefinition = serde_json::from_value(yaml_like).unwrap();
        assert!(!step.requires_approval);
        assert!(!step.skip_on_failure);
        assert!(step.depends_on.is_empty());
        assert_eq!(step.condition.unwrap().condition_type, "keyword_match");
    }
}
