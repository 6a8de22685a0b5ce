//! The workflow engine.
//!
//! A closed finite-state machine over `Step`:
//!
//! ```text
//! route_question ─┬─ vectorstore ─> retrieve ─> grade_documents ─┬─ correct ─────> generate
//!                 └─ websearch ──> websearch <─ not_correct ──────┘                   │
//!                                     │  ^                                            v
//!                                     │  └──────────── not_useful ──── grade_generation ─┬─ useful ─> END
//!                                     └──────────────> generate <─── regenerate ─────────┤
//!                                                                                         └─ stop ───> END
//! ```
//!
//! The state is persisted after every step, so a failed step leaves the
//! store at the previous snapshot and a repeated `invoke` continues there.

use std::time::Duration;

use crate::config::{BusyPolicy, WorkflowConfig};
use crate::pipeline::collaborators::Collaborators;
use crate::pipeline::store::{RunLease, RunStateStore, RunSummary};

use super::routing::{self, Correction, EntryRoute, Reflection};
use super::stages;
use super::state::{Outcome, RunState, RunStatus, Step};
use super::WorkflowError;

/// Retrieval-augmented question answering engine.
///
/// Shareable across threads; runs under different keys execute
/// concurrently, runs under the same key are serialized per `BusyPolicy`
/// through a lease in the store, including across processes.
pub struct Workflow {
    collaborators: Collaborators,
    store: Box<dyn RunStateStore>,
    config: WorkflowConfig,
}

impl Workflow {
    pub fn new(
        collaborators: Collaborators,
        store: Box<dyn RunStateStore>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            collaborators,
            store,
            config,
        }
    }

    /// Answer `question` under `run_key`, returning the final Run State.
    ///
    /// Resumes an interrupted run for the same question; otherwise starts
    /// a new run (the previous finished turn goes into `history`).
    /// A `Finished(Stopped)` result carries an unverified answer; check
    /// `RunState::is_verified`.
    pub fn invoke(&self, question: &str, run_key: &str) -> Result<RunState, WorkflowError> {
        let lease = self.lease_run(run_key)?;

        let stored = self.store.get_or_create(run_key)?;
        let mut state = if stored.is_resumable(question) {
            tracing::info!(run_key, status = %stored.status.label(), "Resuming interrupted run");
            stored
        } else {
            let fresh = stored.begin(question, self.config.history_limit);
            self.store.save(run_key, &fresh)?;
            tracing::info!(run_key, "Starting run");
            fresh
        };

        while let RunStatus::Pending(step) = state.status {
            let span = tracing::info_span!("step", run_key, step = step.as_str());
            let _entered = span.enter();

            let next = self.execute(step, &state)?;
            lease.renew()?;
            self.store.save(run_key, &next)?;
            state = next;
        }

        tracing::info!(
            run_key,
            outcome = state.outcome().map(Outcome::as_str).unwrap_or("none"),
            iterations = state.iterations,
            "Run finished"
        );
        Ok(state)
    }

    /// Persisted state for a key, if any. Never creates a record.
    pub fn state(&self, run_key: &str) -> Result<Option<RunState>, WorkflowError> {
        Ok(self.store.load(run_key)?)
    }

    /// Delete the record for a key, waiting for any in-flight run on it.
    pub fn clear(&self, run_key: &str) -> Result<bool, WorkflowError> {
        let _lease = self.lease_run(run_key)?;
        let removed = self.store.delete(run_key)?;
        tracing::info!(run_key, removed, "Cleared run history");
        Ok(removed)
    }

    pub fn runs(&self) -> Result<Vec<RunSummary>, WorkflowError> {
        Ok(self.store.list()?)
    }

    fn lease_run(&self, run_key: &str) -> Result<RunLease<'_>, WorkflowError> {
        let ttl = Duration::from_secs(self.config.lease_ttl_secs);
        match self.config.busy_policy {
            BusyPolicy::Wait => {
                let poll = Duration::from_millis(self.config.lease_poll_millis);
                Ok(RunLease::acquire(self.store.as_ref(), run_key, ttl, poll)?)
            }
            BusyPolicy::Reject => RunLease::try_acquire(self.store.as_ref(), run_key, ttl)?
                .ok_or_else(|| WorkflowError::RunBusy(run_key.to_string())),
        }
    }

    /// Run one node and apply its outgoing edge.
    fn execute(&self, step: Step, state: &RunState) -> Result<RunState, WorkflowError> {
        let c = &self.collaborators;
        match step {
            Step::RouteQuestion => {
                let next = match routing::route_question(c.router.as_ref(), &state.question)? {
                    EntryRoute::EvidenceRetrieval => Step::Retrieve,
                    EntryRoute::LiveSearch => Step::WebSearch,
                };
                Ok(state.clone().advance(next))
            }
            Step::Retrieve => {
                Ok(stages::retrieve(c.evidence.as_ref(), state)?.advance(Step::GradeDocuments))
            }
            Step::GradeDocuments => {
                let graded = stages::grade_documents(c.relevance.as_ref(), state)?;
                let score = graded.confidence_score.unwrap_or(0.0);
                let next = match routing::decide_to_generate(score, self.config.confidence_threshold)
                {
                    Correction::Correct => Step::Generate,
                    Correction::NotCorrect => Step::WebSearch,
                };
                Ok(graded.advance(next))
            }
            Step::WebSearch => {
                Ok(stages::web_search(c.live_search.as_ref(), state)?.advance(Step::Generate))
            }
            Step::Generate => {
                Ok(stages::generate(c.generator.as_ref(), state)?.advance(Step::GradeGeneration))
            }
            Step::GradeGeneration => {
                let decision = routing::grade_generation(
                    c.groundedness.as_ref(),
                    c.factuality.as_ref(),
                    state,
                    self.config.max_iterations,
                )?;
                Ok(match decision {
                    Reflection::Stop => state.clone().finish(Outcome::Stopped),
                    Reflection::Useful => state.clone().finish(Outcome::Useful),
                    Reflection::Regenerate => state.clone().advance(Step::Generate),
                    Reflection::NotUseful => state.clone().advance(Step::WebSearch),
                })
            }
        }
    }
}
