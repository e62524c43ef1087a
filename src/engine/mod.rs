//! The run engine.
//!
//! `Engine` owns the collaborators a run needs (store, action executor,
//! optional narrator) and exposes the operations that move runs forward:
//!
//! 1. **Lifecycle** - register playbooks, start runs, cancel, abort, sweep
//! 2. **Advancer** - walk pending steps in ordinal order until blocked
//! 3. **Execution** - run one step's action and record the outcome
//! 4. **Gate** - resume a run suspended on a step awaiting approval
//! 5. **Finalizer** - score a finished run and fix its terminal status
//!
//! Each engine step is one store commit: the run row (checked against the
//! version and status it was read with), the step runs it touches and its
//! audit events land together or not at all. Advancers additionally hold a
//! lease on the run, so a step is executed by one advancer at a time.

mod advancer;
mod execution;
mod finalizer;
mod gate;
mod lifecycle;


use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use playbook_common::{
    AuditEventType, NewAuditEvent, Run, RunState, RunStatus, RunVariant, StepRun, StepRunStatus,
};

use crate::action::ActionExecutor;
use crate::audit::AuditLog;
use crate::config::{PlaybookToml, RetryPolicy, ScoringConfig};
use crate::errors::{EngineError, PersistenceExt};
use crate::narrator::{HttpNarrator, Narrator};
use crate::store::{Commit, RunStore, StepWrite};

pub use finalizer::{confidence_score, risk_score};
pub use gate::{Decision, DecisionResult};

/// Result of one advancement pass.
#[derive(Debug, Clone, Serialize)]
pub struct AdvanceResult {
    pub run: Run,
    /// Step runs whose status changed during the pass, in processing order
    pub processed: Vec<StepRun>,
    /// First step run that is not yet terminal
    pub next_pending: Option<StepRun>,
    /// Whether the run reached a terminal status
    pub is_complete: bool,
}

/// Parameters for starting a run.
#[derive(Debug, Clone)]
pub struct StartRun {
    pub variant: RunVariant,
    pub initial_state: RunState,
    pub created_by: String,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl StartRun {
    pub fn new(created_by: &str) -> Self {
        Self {
            variant: RunVariant::Playbook,
            initial_state: RunState::new(),
            created_by: created_by.to_string(),
            scheduled_at: None,
        }
    }

    pub fn with_variant(mut self, variant: RunVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_state(mut self, state: RunState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// A run with its step runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub steps: Vec<StepRun>,
}

/// Outcome of a pass of the run sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub advanced: Vec<AdvanceResult>,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub run_id: Uuid,
    pub error: String,
}

/// Step runs cancelled in memory, each with the status it was read in.
#[derive(Debug, Default)]
struct CancelledSteps {
    steps: Vec<(StepRun, StepRunStatus)>,
    events: Vec<NewAuditEvent>,
}

impl CancelledSteps {
    fn writes(&self) -> impl Iterator<Item = StepWrite<'_>> {
        self.steps
            .iter()
            .map(|(step_run, prior)| StepWrite::new(step_run, *prior))
    }
}

fn state_changed(run_id: Uuid, from: RunStatus, to: RunStatus, actor: &str) -> NewAuditEvent {
    NewAuditEvent::run(
        run_id,
        AuditEventType::StateChanged,
        json!({ "from": from, "to": to }),
    )
    .by(actor)
}

const DEFAULT_CLAIM_LEASE_SECS: i64 = 300;
/// Longer leases are capped to keep expiry timestamps representable.
const MAX_CLAIM_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

pub struct Engine {
    org_id: String,
    store: Arc<dyn RunStore>,
    executor: Arc<dyn ActionExecutor>,
    narrator: Option<Arc<dyn Narrator>>,
    audit: AuditLog,
    retry: RetryPolicy,
    scoring: ScoringConfig,
    claim_lease: Duration,
}

impl Engine {
    pub fn new(org_id: &str, store: Arc<dyn RunStore>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            org_id: org_id.to_string(),
            audit: AuditLog::new(store.clone()),
            store,
            executor,
            narrator: None,
            retry: RetryPolicy::default(),
            scoring: ScoringConfig::default(),
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    /// Build an engine from file/env configuration.
    pub fn from_config(
        config: &PlaybookToml,
        store: Arc<dyn RunStore>,
        executor: Arc<dyn ActionExecutor>,
    ) -> anyhow::Result<Self> {
        let mut engine = Self::new(&config.engine.org_id, store, executor)
            .with_retry_policy(config.retry)
            .with_scoring(config.scoring)
            .with_claim_lease(Duration::seconds(
                config.engine.claim_lease_secs.min(MAX_CLAIM_LEASE_SECS) as i64,
            ));
        if let Some(narrator) = HttpNarrator::from_config(&config.narrator)? {
            engine = engine.with_narrator(Arc::new(narrator));
        }
        Ok(engine)
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>) -> Self {
        self.narrator = Some(narrator);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// How long an advancer may hold a run before another may take it over.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    fn load_run(&self, run_id: Uuid) -> Result<Run, EngineError> {
        self.store
            .get_run(&self.org_id, run_id)
            .persisted()?
            .ok_or(EngineError::RunNotFound { id: run_id })
    }

    fn load_steps(&self, run_id: Uuid) -> Result<Vec<StepRun>, EngineError> {
        self.store.list_step_runs(&self.org_id, run_id).persisted()
    }

    /// Write `run`, the step writes and `events` as one store transaction.
    ///
    /// `expected` is the run status the caller read. Any mismatch with the
    /// stored rows is a [`EngineError::Conflict`] and nothing is written.
    fn commit(
        &self,
        run: &mut Run,
        expected: RunStatus,
        steps: &[StepWrite<'_>],
        events: Vec<NewAuditEvent>,
    ) -> Result<(), EngineError> {
        run.updated_at = Utc::now();
        let committed = self
            .store
            .commit(&Commit {
                run: &*run,
                expected_status: expected,
                steps,
                events: &events,
            })
            .persisted()?;
        if !committed {
            return Err(EngineError::Conflict { run_id: run.id });
        }
        run.version += 1;
        self.audit.committed(&events);
        Ok(())
    }

    /// Commit without a run status change.
    fn save(
        &self,
        run: &mut Run,
        steps: &[StepWrite<'_>],
        events: Vec<NewAuditEvent>,
    ) -> Result<(), EngineError> {
        let status = run.status;
        self.commit(run, status, steps, events)
    }

    /// Validate a run status change and commit it with the given writes.
    ///
    /// A `state_changed` event precedes `events` when the status moves.
    fn transition(
        &self,
        run: &mut Run,
        next: RunStatus,
        actor: &str,
        steps: &[StepWrite<'_>],
        mut events: Vec<NewAuditEvent>,
    ) -> Result<(), EngineError> {
        let prior = run.status;
        run.set_status(next)?;
        if prior != next {
            events.insert(0, state_changed(run.id, prior, next, actor));
        }
        self.commit(run, prior, steps, events)
    }

    /// Take the advancer lease on a run. `None` while another advancer holds it.
    fn claim(&self, run_id: Uuid) -> Result<Option<Uuid>, EngineError> {
        let holder = Uuid::new_v4();
        let now = Utc::now();
        let claimed = self
            .store
            .claim_run(&self.org_id, run_id, holder, now, now + self.claim_lease)
            .persisted()?;
        Ok(claimed.then_some(holder))
    }

    /// Extend a held lease before work that outlives a single commit.
    fn renew(&self, run_id: Uuid, holder: Uuid) -> Result<(), EngineError> {
        let now = Utc::now();
        let renewed = self
            .store
            .claim_run(&self.org_id, run_id, holder, now, now + self.claim_lease)
            .persisted()?;
        if !renewed {
            return Err(EngineError::Conflict { run_id });
        }
        Ok(())
    }

    fn release(&self, run_id: Uuid, holder: Uuid) {
        if let Err(err) = self.store.release_run(&self.org_id, run_id, holder) {
            warn!(%run_id, error = %err, "failed to release run claim; it will expire");
        }
    }

    /// Mark every open step run of a run cancelled, in memory.
    ///
    /// Returns the changed step runs with the status each was read in, plus
    /// one `step_cancelled` event per step, ready to be committed.
    fn cancel_open_steps(
        &self,
        run_id: Uuid,
        except: Option<Uuid>,
        actor: &str,
        reason: &str,
    ) -> Result<CancelledSteps, EngineError> {
        let mut cancelled = CancelledSteps::default();
        for mut step_run in self.load_steps(run_id)? {
            if step_run.is_terminal() || Some(step_run.id) == except {
                continue;
            }
            let prior = step_run.status;
            step_run.set_status(StepRunStatus::Cancelled)?;
            cancelled.events.push(
                NewAuditEvent::step(
                    run_id,
                    step_run.id,
                    AuditEventType::StepCancelled,
                    json!({ "step_id": step_run.step_id, "reason": reason }),
                )
                .by(actor),
            );
            cancelled.steps.push((step_run, prior));
        }
        Ok(cancelled)
    }

    /// Current view of a run for callers.
    fn snapshot(&self, run: Run, processed: Vec<StepRun>) -> Result<AdvanceResult, EngineError> {
        let steps = self.load_steps(run.id)?;
        let next_pending = steps.into_iter().find(|s| !s.is_terminal());
        Ok(AdvanceResult {
            is_complete: run.is_terminal(),
            run,
            processed,
            next_pending,
        })
    }
}
