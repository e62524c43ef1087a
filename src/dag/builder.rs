//! DAG builder for validating playbook step graphs.
//!
//! The builder takes a playbook's steps with their dependencies and constructs
//! a directed acyclic graph that the advancer walks in ordinal order.

use std::collections::HashMap;

use playbook_common::{PlaybookDefinition, StepDefinition};

use crate::condition::Condition;
use crate::errors::DefinitionError;

/// Index into the position-ordered step list.
pub type StepIndex = usize;

/// A validated, acyclic graph of playbook steps.
#[derive(Debug)]
pub struct StepGraph {
    /// Steps sorted by ascending position
    steps: Vec<StepDefinition>,
    /// index -> steps that depend on it
    forward_edges: Vec<Vec<StepIndex>>,
    /// index -> steps it depends on
    reverse_edges: Vec<Vec<StepIndex>>,
}

impl StepGraph {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get_step(&self, index: StepIndex) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    /// Steps in ascending ordinal position.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Steps that depend on the given step.
    pub fn dependents(&self, index: StepIndex) -> &[StepIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Steps the given step depends on.
    pub fn dependencies(&self, index: StepIndex) -> &[StepIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }
}

/// Builder for constructing step graphs.
pub struct DagBuilder<'a> {
    playbook: &'a PlaybookDefinition,
}

impl<'a> DagBuilder<'a> {
    pub fn new(playbook: &'a PlaybookDefinition) -> Self {
        Self { playbook }
    }

    /// Build the step graph.
    ///
    /// This validates the playbook:
    /// - It has at least one step and step ids are unique
    /// - Every dependency references an existing step other than itself
    /// - No cycles are allowed
    /// - Every condition of a recognised type has well-formed parameters
    pub fn build(self) -> Result<StepGraph, DefinitionError> {
        if self.playbook.steps.is_empty() {
            return Err(DefinitionError::NoSteps {
                name: self.playbook.name.clone(),
            });
        }

        let steps: Vec<StepDefinition> = self
            .playbook
            .ordered_steps()
            .into_iter()
            .cloned()
            .collect();

        let mut index_map = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index_map.insert(step.id.clone(), i).is_some() {
                return Err(DefinitionError::DuplicateStep {
                    step: step.id.clone(),
                });
            }
        }

        let mut forward_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); steps.len()];
        let mut reverse_edges: Vec<Vec<StepIndex>> = vec![Vec::new(); steps.len()];

        for (to_idx, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(DefinitionError::SelfDependency {
                        step: step.id.clone(),
                    });
                }
                let from_idx = *index_map.get(dep).ok_or_else(|| {
                    DefinitionError::UnknownDependency {
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;

                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }

            if let Some(spec) = &step.condition {
                let condition =
                    Condition::parse(spec).map_err(|e| DefinitionError::InvalidCondition {
                        step: step.id.clone(),
                        reason: e.to_string(),
                    })?;
                if let Condition::DependencyResult { step: target } = &condition
                    && !index_map.contains_key(target)
                {
                    return Err(DefinitionError::InvalidCondition {
                        step: step.id.clone(),
                        reason: format!("dependency_result refers to unknown step '{}'", target),
                    });
                }
            }
        }

        let graph = StepGraph {
            steps,
            forward_edges,
            reverse_edges,
        };

        Self::validate_no_cycles(&graph)?;

        Ok(graph)
    }

    /// Validate that the graph has no cycles using Kahn's algorithm.
    fn validate_no_cycles(graph: &StepGraph) -> Result<(), DefinitionError> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut queue: Vec<StepIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            let steps: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.get_step(i).map(|s| s.id.clone()))
                .collect();

            return Err(DefinitionError::Cycle { steps });
        }

        Ok(())
    }
}

/// Validate a playbook, discarding the graph.
pub fn validate(playbook: &PlaybookDefinition) -> Result<(), DefinitionError> {
    DagBuilder::new(playbook).build().map(|_| ())
}
