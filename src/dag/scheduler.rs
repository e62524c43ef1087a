//! Readiness checks and wave planning over a validated step graph.
//!
//! The advancer asks `dependencies_satisfied` for each pending step in
//! ordinal order; `compute_waves` is used for the plan shown on import.

use std::collections::{HashMap, HashSet};

use playbook_common::{StepDefinition, StepRunStatus};

use crate::dag::builder::{StepGraph, StepIndex};

/// Whether every dependency of `step` is executed or skipped.
///
/// A dependency without a status entry is treated as unsatisfied.
pub fn dependencies_satisfied(
    step: &StepDefinition,
    statuses: &HashMap<String, StepRunStatus>,
) -> bool {
    step.depends_on.iter().all(|dep| {
        statuses
            .get(dep)
            .is_some_and(|status| status.satisfies_dependents())
    })
}

impl StepGraph {
    /// Group steps into waves: every step in a wave depends only on steps in
    /// earlier waves. Steps inside a wave keep their ordinal order.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut completed: HashSet<StepIndex> = HashSet::new();

        loop {
            let ready: Vec<StepIndex> = (0..self.len())
                .filter(|i| !completed.contains(i))
                .filter(|&i| self.dependencies(i).iter().all(|dep| completed.contains(dep)))
                .collect();

            if ready.is_empty() {
                break;
            }

            completed.extend(ready.iter().copied());
            waves.push(
                ready
                    .into_iter()
                    .filter_map(|i| self.get_step(i).map(|s| s.id.clone()))
                    .collect(),
            );
        }

        waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use playbook_common::{ActionDescriptor, PlaybookDefinition};
    use serde_json::json;

    fn step(id: &str, position: u32, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(id, position, ActionDescriptor::new("simulate", json!({})))
            .with_depends_on(deps)
    }

    #[test]
    fn test_compute_waves_diamond() {
        let pb = PlaybookDefinition::new(
            "acme",
            "diamond",
            vec![
                step("triage", 1, &[]),
                step("isolate", 2, &["triage"]),
                step("notify", 3, &["triage"]),
                step("close", 4, &["isolate", "notify"]),
            ],
        );
        let graph = DagBuilder::new(&pb).build().unwrap();

        let waves = graph.compute_waves();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["triage"]);
        assert_eq!(waves[1], vec!["isolate", "notify"]);
        assert_eq!(waves[2], vec!["close"]);
    }

    #[test]
    fn test_dependencies_satisfied_by_executed_or_skipped() {
        let close = step("close", 3, &["isolate", "notify"]);
        let mut statuses = HashMap::new();
        statuses.insert("isolate".to_string(), StepRunStatus::Executed);
        statuses.insert("notify".to_string(), StepRunStatus::Pending);
        assert!(!dependencies_satisfied(&close, &statuses));

        statuses.insert("notify".to_string(), StepRunStatus::Skipped);
        assert!(dependencies_satisfied(&close, &statuses));

        statuses.insert("notify".to_string(), StepRunStatus::Failed);
        assert!(!dependencies_satisfied(&close, &statuses));
    }

    #[test]
    fn test_missing_status_is_unsatisfied() {
        let close = step("close", 2, &["isolate"]);
        assert!(!dependencies_satisfied(&close, &HashMap::new()));
        assert!(dependencies_satisfied(&step("root", 1, &[]), &HashMap::new()));
    }
}
