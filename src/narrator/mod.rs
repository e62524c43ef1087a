//! Optional narrative generation for finished runs.
//!
//! A `Narrator` turns a finished run's summary into human-readable text and a
//! risk graph. It is best-effort: the finalizer logs and audits a failure and
//! carries on with the run's terminal status unchanged.

mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use playbook_common::{Run, StepRun};

pub use http::HttpNarrator;

/// What the narrator is told about a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub playbook_name: String,
    pub variant: String,
    pub steps: Vec<StepSummary>,
    pub metrics: BTreeMap<String, f64>,
    pub notes: Vec<String>,
    pub risk_score: f64,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepSummary {
    pub step_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(run: &Run, steps: &[StepRun], risk_score: f64, confidence_score: f64) -> Self {
        Self {
            run_id: run.id,
            playbook_name: run.definition.name.clone(),
            variant: run.variant.to_string(),
            steps: steps
                .iter()
                .map(|s| StepSummary {
                    step_id: s.step_id.clone(),
                    status: s.status.to_string(),
                    summary: s.outcome.as_ref().and_then(|o| o.summary.clone()),
                    error: s.error.clone(),
                })
                .collect(),
            metrics: run.state.metrics().clone(),
            notes: run.state.notes().to_vec(),
            risk_score,
            confidence_score,
        }
    }
}

/// Narrator output stored on the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Narrative {
    pub narrative: String,
    #[serde(default)]
    pub risk_graph: serde_json::Value,
}

#[async_trait]
pub trait Narrator: Send + Sync {
    async fn summarize(&self, summary: &RunSummary) -> anyhow::Result<Narrative>;
}
