//! Structured results returned by action executors.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Per-step impact deltas keyed by metric name.
pub type ImpactMetrics = BTreeMap<String, f64>;

/// Severity of an outcome entry, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// A categorised finding inside an outcome (e.g. an exposed asset, a detected threat).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeEntry {
    pub category: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub detail: String,
}

/// What an action produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    /// Whether the action succeeded; a `false` here is handled like an executor error
    pub success: bool,
    /// Free-form result payload
    #[serde(default)]
    pub result: serde_json::Value,
    /// Metric deltas merged into the run state on success
    #[serde(default)]
    pub impact: ImpactMetrics,
    #[serde(default)]
    pub entries: Vec<OutcomeEntry>,
    /// Text appended to the run's keyword-searchable log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    /// A successful outcome with no impact.
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_impact(mut self, metric: &str, delta: f64) -> Self {
        self.impact.insert(metric.to_string(), delta);
        self
    }

    pub fn with_entry(mut self, category: &str, severity: Severity) -> Self {
        self.entries.push(OutcomeEntry {
            category: category.to_string(),
            severity,
            detail: String::new(),
        });
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    /// Whether an entry of `category` exists with at least `min_severity`.
    pub fn has_entry(&self, category: &str, min_severity: Option<Severity>) -> bool {
        self.entries.iter().any(|e| {
            e.category == category && min_severity.is_none_or(|min| e.severity >= min)
        })
    }
}
