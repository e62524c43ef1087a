//! Run finalization: counters, scores, narrative, terminal status.

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use playbook_common::{
    AuditEventType, NewAuditEvent, Run, RunStatus, SYSTEM_ACTOR, StepRun, StepRunStatus,
};

use crate::config::ScoringConfig;
use crate::errors::EngineError;
use crate::narrator::RunSummary;

use super::{Engine, state_changed};

/// Risk grows with failed steps and accumulated negative impact.
///
/// The result is clamped to `[0, max_score]`.
pub fn risk_score(scoring: &ScoringConfig, failed_steps: u32, negative_impact: f64) -> f64 {
    let raw = scoring.failure_weight * f64::from(failed_steps)
        + scoring.negative_impact_weight * negative_impact;
    clamp_score(raw, scoring.max_score)
}

/// Confidence grows with accumulated positive impact, clamped like [`risk_score`].
pub fn confidence_score(scoring: &ScoringConfig, positive_impact: f64) -> f64 {
    clamp_score(scoring.positive_impact_weight * positive_impact, scoring.max_score)
}

fn clamp_score(raw: f64, max_score: f64) -> f64 {
    let max = max_score.max(0.0);
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, max)
}

impl Engine {
    /// Finalize a running run whose steps are all terminal.
    #[instrument(skip(self), fields(org_id = %self.org_id))]
    pub async fn finalize(&self, run_id: Uuid) -> Result<Run, EngineError> {
        let mut run = self.load_run(run_id)?;
        if run.status != RunStatus::Running {
            return Err(EngineError::InvalidState {
                entity: "run",
                id: run.id,
                expected: RunStatus::Running.to_string(),
                actual: run.status.to_string(),
            });
        }
        let Some(claim) = self.claim(run.id)? else {
            return Err(EngineError::Conflict { run_id: run.id });
        };
        let result = match self.load_steps(run.id) {
            Ok(steps) => self.finalize_run(&mut run, &steps).await,
            Err(err) => Err(err),
        };
        self.release(run.id, claim);
        result.map(|()| run)
    }

    pub(crate) async fn finalize_run(
        &self,
        run: &mut Run,
        steps: &[StepRun],
    ) -> Result<(), EngineError> {
        if let Some(open) = steps.iter().find(|s| !s.is_terminal()) {
            return Err(EngineError::InvalidState {
                entity: "step run",
                id: open.id,
                expected: "a terminal status".to_string(),
                actual: open.status.to_string(),
            });
        }

        let count = |status: StepRunStatus| {
            steps.iter().filter(|s| s.status == status).count() as u32
        };
        run.steps_completed = count(StepRunStatus::Executed);
        run.steps_failed = count(StepRunStatus::Failed);
        run.steps_skipped = count(StepRunStatus::Skipped);

        let risk = risk_score(&self.scoring, run.steps_failed, run.state.negative_impact());
        let confidence = confidence_score(&self.scoring, run.state.positive_impact());
        run.risk_score = Some(risk);
        run.confidence_score = Some(confidence);

        let mut events = Vec::new();
        if let Some(narrator) = &self.narrator {
            let summary = RunSummary::new(run, steps, risk, confidence);
            match narrator.summarize(&summary).await {
                Ok(narrative) => {
                    run.narrative = Some(narrative.narrative);
                    run.risk_graph = Some(narrative.risk_graph).filter(|g| !g.is_null());
                }
                Err(err) => {
                    warn!(run_id = %run.id, error = %err, "narrative generation failed");
                    events.push(NewAuditEvent::run(
                        run.id,
                        AuditEventType::NarrativeUnavailable,
                        json!({ "error": err.to_string() }),
                    ));
                }
            }
        }

        let (status, event_type) = if run.steps_failed > 0 {
            (RunStatus::Failed, AuditEventType::RunFailed)
        } else {
            (RunStatus::Completed, AuditEventType::RunCompleted)
        };
        let prior = run.status;
        run.set_status(status)?;
        events.push(state_changed(run.id, prior, status, SYSTEM_ACTOR));
        events.push(NewAuditEvent::run(
            run.id,
            event_type,
            json!({
                "steps_completed": run.steps_completed,
                "steps_failed": run.steps_failed,
                "steps_skipped": run.steps_skipped,
                "risk_score": risk,
                "confidence_score": confidence,
                "error": run.error,
            }),
        ));
        self.commit(run, prior, &[], events)?;

        info!(
            run_id = %run.id,
            status = %run.status,
            completed = run.steps_completed,
            failed = run.steps_failed,
            skipped = run.steps_skipped,
            risk,
            confidence,
            "run finalized"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_score_weights_failures_and_negative_impact() {
        let scoring = ScoringConfig::default();
        assert_eq!(risk_score(&scoring, 0, 0.0), 0.0);
        assert_eq!(risk_score(&scoring, 1, 0.0), 25.0);
        assert_eq!(risk_score(&scoring, 2, 7.5), 57.5);
    }

    #[test]
    fn test_scores_are_clamped() {
        let scoring = ScoringConfig::default();
        assert_eq!(risk_score(&scoring, 10, 0.0), 100.0);
        assert_eq!(confidence_score(&scoring, 250.0), 100.0);

        let negative = ScoringConfig {
            positive_impact_weight: -1.0,
            ..ScoringConfig::default()
        };
        assert_eq!(confidence_score(&negative, 5.0), 0.0);
    }

    #[test]
    fn test_negative_max_score_clamps_to_zero() {
        let scoring = ScoringConfig {
            max_score: -5.0,
            ..ScoringConfig::default()
        };
        assert_eq!(risk_score(&scoring, 3, 0.0), 0.0);
    }

    #[test]
    fn test_nan_impact_scores_zero() {
        let scoring = ScoringConfig::default();
        assert_eq!(confidence_score(&scoring, f64::NAN), 0.0);
    }
}
