//! Trigger conditions that gate step execution.
//!
//! A `ConditionSpec` from a playbook is parsed into a typed `Condition` and
//! evaluated against the run state. Evaluation is pure: the same condition and
//! the same context always give the same `Evaluation`.
//!
//! Recognised types:
//! - `always`
//! - `metric_threshold`: `{ field, comparator?, threshold }`
//! - `keyword_match`: `{ keywords, case_sensitive?, mode? }`
//! - `outcome_match`: `{ step?, category, min_severity? }`
//! - `dependency_result`: `{ step }`
//!
//! Any other type parses to `Condition::Unevaluated`, which is met without
//! evaluation and says so in its details.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use playbook_common::{ActionOutcome, CONDITION_ALWAYS, ConditionSpec, RunState, Severity};

/// Tolerance used by the `eq` comparator.
const EQ_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("malformed {condition_type} parameters: {reason}")]
pub struct ConditionError {
    pub condition_type: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    #[default]
    Gte,
    Gt,
    Eq,
    Lte,
    Lt,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gte => "gte",
            Self::Gt => "gt",
            Self::Eq => "eq",
            Self::Lte => "lte",
            Self::Lt => "lt",
        }
    }

    fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gte => value >= threshold,
            Self::Gt => value > threshold,
            Self::Eq => (value - threshold).abs() < EQ_EPSILON,
            Self::Lte => value <= threshold,
            Self::Lt => value < threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

/// A parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Always,
    MetricThreshold {
        field: String,
        comparator: Comparator,
        threshold: f64,
    },
    KeywordMatch {
        keywords: Vec<String>,
        case_sensitive: bool,
        mode: MatchMode,
    },
    /// Without `step`, targets the prior step's outcome (suite runs only).
    OutcomeMatch {
        step: Option<String>,
        category: String,
        min_severity: Option<Severity>,
    },
    DependencyResult {
        step: String,
    },
    /// A type this engine does not know how to evaluate.
    Unevaluated {
        condition_type: String,
    },
}

#[derive(Deserialize)]
struct MetricThresholdParams {
    #[serde(alias = "metric")]
    field: String,
    #[serde(default)]
    comparator: Comparator,
    threshold: f64,
}

#[derive(Deserialize)]
struct KeywordMatchParams {
    keywords: Vec<String>,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    mode: MatchMode,
}

#[derive(Deserialize)]
struct OutcomeMatchParams {
    #[serde(default)]
    step: Option<String>,
    category: String,
    #[serde(default)]
    min_severity: Option<Severity>,
}

#[derive(Deserialize)]
struct DependencyResultParams {
    #[serde(alias = "dependency")]
    step: String,
}

fn params<T: DeserializeOwned>(spec: &ConditionSpec) -> Result<T, ConditionError> {
    let value = if spec.params.is_null() {
        json!({})
    } else {
        spec.params.clone()
    };
    serde_json::from_value(value).map_err(|e| ConditionError {
        condition_type: spec.condition_type.clone(),
        reason: e.to_string(),
    })
}

impl Condition {
    /// Parse a condition spec. Unknown types are accepted as `Unevaluated`;
    /// malformed parameters for a known type are an error.
    pub fn parse(spec: &ConditionSpec) -> Result<Self, ConditionError> {
        let condition = match spec.condition_type.as_str() {
            CONDITION_ALWAYS => Self::Always,
            "metric_threshold" => {
                let p: MetricThresholdParams = params(spec)?;
                Self::MetricThreshold {
                    field: p.field,
                    comparator: p.comparator,
                    threshold: p.threshold,
                }
            }
            "keyword_match" => {
                let p: KeywordMatchParams = params(spec)?;
                if p.keywords.is_empty() {
                    return Err(ConditionError {
                        condition_type: spec.condition_type.clone(),
                        reason: "keywords must not be empty".to_string(),
                    });
                }
                Self::KeywordMatch {
                    keywords: p.keywords,
                    case_sensitive: p.case_sensitive,
                    mode: p.mode,
                }
            }
            "outcome_match" => {
                let p: OutcomeMatchParams = params(spec)?;
                Self::OutcomeMatch {
                    step: p.step,
                    category: p.category,
                    min_severity: p.min_severity,
                }
            }
            "dependency_result" => {
                let p: DependencyResultParams = params(spec)?;
                Self::DependencyResult { step: p.step }
            }
            other => Self::Unevaluated {
                condition_type: other.to_string(),
            },
        };
        Ok(condition)
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Always => CONDITION_ALWAYS,
            Self::MetricThreshold { .. } => "metric_threshold",
            Self::KeywordMatch { .. } => "keyword_match",
            Self::OutcomeMatch { .. } => "outcome_match",
            Self::DependencyResult { .. } => "dependency_result",
            Self::Unevaluated { condition_type } => condition_type,
        }
    }

    /// Evaluate against the run state.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Evaluation {
        match self {
            Self::Always => Evaluation::new(true, json!({ "type": CONDITION_ALWAYS })),
            Self::MetricThreshold {
                field,
                comparator,
                threshold,
            } => {
                let value = ctx.state.metric(field);
                let met = value.is_some_and(|v| comparator.compare(v, *threshold));
                Evaluation::new(
                    met,
                    json!({
                        "type": self.type_name(),
                        "field": field,
                        "comparator": comparator.as_str(),
                        "threshold": threshold,
                        "value": value,
                    }),
                )
            }
            Self::KeywordMatch {
                keywords,
                case_sensitive,
                mode,
            } => {
                let text = ctx.state.text();
                let haystack = if *case_sensitive {
                    text
                } else {
                    text.to_lowercase()
                };
                let matched: Vec<&String> = keywords
                    .iter()
                    .filter(|k| {
                        if *case_sensitive {
                            haystack.contains(k.as_str())
                        } else {
                            haystack.contains(&k.to_lowercase())
                        }
                    })
                    .collect();
                let met = match mode {
                    MatchMode::Any => !matched.is_empty(),
                    MatchMode::All => matched.len() == keywords.len(),
                };
                Evaluation::new(
                    met,
                    json!({
                        "type": self.type_name(),
                        "mode": match mode { MatchMode::Any => "any", MatchMode::All => "all" },
                        "matched": matched,
                    }),
                )
            }
            Self::OutcomeMatch {
                step,
                category,
                min_severity,
            } => {
                let target: Option<(&str, &ActionOutcome)> = match step {
                    Some(step_id) => ctx.state.outcome(step_id).map(|o| (step_id.as_str(), o)),
                    None => ctx.prior_outcome,
                };
                let met = target.is_some_and(|(_, o)| o.has_entry(category, *min_severity));
                Evaluation::new(
                    met,
                    json!({
                        "type": self.type_name(),
                        "category": category,
                        "min_severity": min_severity.map(|s| s.as_str()),
                        "target_step": target.map(|(id, _)| id),
                    }),
                )
            }
            Self::DependencyResult { step } => {
                let succeeded = ctx.state.outcome(step).is_some_and(|o| o.success);
                Evaluation::new(
                    succeeded,
                    json!({ "type": self.type_name(), "step": step, "succeeded": succeeded }),
                )
            }
            Self::Unevaluated { condition_type } => Evaluation::new(
                true,
                json!({
                    "type": condition_type,
                    "evaluated": false,
                    "note": format!(
                        "condition type '{}' is not recognised; treated as met without evaluation",
                        condition_type
                    ),
                }),
            ),
        }
    }
}

/// Inputs visible to a condition.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub state: &'a RunState,
    /// Most recently completed step's outcome, exposed for suite runs only
    pub prior_outcome: Option<(&'a str, &'a ActionOutcome)>,
}

impl<'a> EvalContext<'a> {
    pub fn new(state: &'a RunState) -> Self {
        Self {
            state,
            prior_outcome: None,
        }
    }

    pub fn with_prior_outcome(mut self) -> Self {
        self.prior_outcome = self.state.last_outcome();
        self
    }
}

/// Result of evaluating a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub met: bool,
    pub details: Value,
}

impl Evaluation {
    fn new(met: bool, details: Value) -> Self {
        Self { met, details }
    }
}

/// Parse and evaluate a condition spec in one call.
pub fn evaluate(spec: &ConditionSpec, ctx: &EvalContext<'_>) -> Result<Evaluation, ConditionError> {
    Ok(Condition::parse(spec)?.evaluate(ctx))
}
