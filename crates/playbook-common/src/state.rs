//! Typed accumulator for the context a run builds up as steps execute.
//!
//! Only the engine mutates a `RunState`, and only through the methods here.
//! Executors and the condition evaluator receive it by shared reference.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::outcome::ActionOutcome;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunState {
    /// Named numeric fields visible to `metric_threshold` conditions
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
    /// Text fragments searched by `keyword_match` conditions
    #[serde(default)]
    notes: Vec<String>,
    /// Successful outcomes keyed by step id
    #[serde(default)]
    outcomes: BTreeMap<String, ActionOutcome>,
    #[serde(default)]
    last_completed_step: Option<String>,
    #[serde(default)]
    positive_impact: f64,
    #[serde(default)]
    negative_impact: f64,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a metric before the run starts.
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Seed a text fragment before the run starts.
    pub fn with_note(mut self, note: &str) -> Self {
        self.notes.push(note.to_string());
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// All notes joined into one searchable blob.
    pub fn text(&self) -> String {
        self.notes.join("\n")
    }

    pub fn outcome(&self, step_id: &str) -> Option<&ActionOutcome> {
        self.outcomes.get(step_id)
    }

    /// Outcome of the most recently completed step, if any.
    pub fn last_outcome(&self) -> Option<(&str, &ActionOutcome)> {
        let step_id = self.last_completed_step.as_deref()?;
        self.outcomes.get(step_id).map(|o| (step_id, o))
    }

    pub fn positive_impact(&self) -> f64 {
        self.positive_impact
    }

    pub fn negative_impact(&self) -> f64 {
        self.negative_impact
    }

    /// Merge a successful step outcome: impact deltas are added to metrics and
    /// to the running positive/negative totals, the summary joins the notes.
    pub fn record_outcome(&mut self, step_id: &str, outcome: &ActionOutcome) {
        for (metric, delta) in &outcome.impact {
            *self.metrics.entry(metric.clone()).or_insert(0.0) += delta;
            if *delta >= 0.0 {
                self.positive_impact += delta;
            } else {
                self.negative_impact += delta.abs();
            }
        }
        if let Some(summary) = &outcome.summary {
            self.notes.push(summary.clone());
        }
        self.outcomes.insert(step_id.to_string(), outcome.clone());
        self.last_completed_step = Some(step_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Severity;

    #[test]
    fn test_record_outcome_merges_impact() {
        let mut state = RunState::new().with_metric("exposure", 10.0);
        let outcome = ActionOutcome::succeeded()
            .with_impact("exposure", -4.0)
            .with_impact("coverage", 3.0)
            .with_summary("isolated host web-01");

        state.record_outcome("isolate", &outcome);

        assert_eq!(state.metric("exposure"), Some(6.0));
        assert_eq!(state.metric("coverage"), Some(3.0));
        assert_eq!(state.positive_impact(), 3.0);
        assert_eq!(state.negative_impact(), 4.0);
        assert!(state.text().contains("web-01"));
    }

    #[test]
    fn test_last_outcome_tracks_most_recent_step() {
        let mut state = RunState::new();
        assert!(state.last_outcome().is_none());

        state.record_outcome("scan", &ActionOutcome::succeeded());
        state.record_outcome(
            "classify",
            &ActionOutcome::succeeded().with_entry("phishing", Severity::High),
        );

        let (step_id, outcome) = state.last_outcome().unwrap();
        assert_eq!(step_id, "classify");
        assert!(outcome.has_entry("phishing", None));
        assert!(state.outcome("scan").is_some());
    }

    #[test]
    fn test_absent_metric_is_none() {
        let state = RunState::new();
        assert_eq!(state.metric("missing"), None);
        assert_eq!(state.text(), "");
    }
}
