//! Run State: the record threaded through every stage, plus the engine
//! cursor that makes a run resumable after a failed stage.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::pipeline::collaborators::Passage;

// ═══════════════════════════════════════════════════════════
// Cursor
// ═══════════════════════════════════════════════════════════

/// A named node of the decision graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Conditional entry point: knowledge base or live search.
    RouteQuestion,
    /// Similarity search + reranking.
    Retrieve,
    /// Per-passage relevance filtering, sets the confidence score.
    GradeDocuments,
    /// Live search escalation (append one passage).
    WebSearch,
    /// Compress evidence, then generate an answer.
    Generate,
    /// Self-reflection over the latest answer.
    GradeGeneration,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RouteQuestion => "route_question",
            Self::Retrieve => "retrieve",
            Self::GradeDocuments => "grade_documents",
            Self::WebSearch => "websearch",
            Self::Generate => "generate",
            Self::GradeGeneration => "grade_generation",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a finished run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Answer judged grounded in the evidence and resolving the question.
    Useful,
    /// Iteration budget exhausted; the last answer was accepted unverified.
    Stopped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Useful => "useful",
            Self::Stopped => "stopped",
        }
    }
}

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "at", rename_all = "snake_case")]
pub enum RunStatus {
    /// No question has been asked under this key yet.
    Idle,
    /// Mid-run; the step is the next one to execute.
    Pending(Step),
    /// Terminal.
    Finished(Outcome),
}

impl RunStatus {
    /// Short label stored alongside the record.
    pub fn label(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::Pending(step) => format!("pending:{step}"),
            Self::Finished(outcome) => format!("finished:{}", outcome.as_str()),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// RunState
// ═══════════════════════════════════════════════════════════

/// A finished question kept for multi-turn sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTurn {
    pub question: String,
    pub generation: Option<String>,
    pub outcome: Outcome,
    pub confidence_score: Option<f64>,
    pub iterations: u32,
    pub finished_at: String,
}

/// The mutable record flowing through every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Set once when a run starts.
    pub question: String,
    /// Current evidence set.
    pub documents: Vec<Passage>,
    /// Latest candidate answer; `None` until the first generation.
    pub generation: Option<String>,
    /// Relevant fraction from the latest filtering pass.
    pub confidence_score: Option<f64>,
    /// Completed generation attempts in this run.
    pub iterations: u32,
    pub status: RunStatus,
    /// Earlier finished questions under the same run key, oldest first.
    #[serde(default)]
    pub history: Vec<CompletedTurn>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            question: String::new(),
            documents: Vec::new(),
            generation: None,
            confidence_score: None,
            iterations: 0,
            status: RunStatus::Idle,
            history: Vec::new(),
        }
    }
}

impl RunState {
    /// Fresh run for a question, with empty history.
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            status: RunStatus::Pending(Step::RouteQuestion),
            ..Self::default()
        }
    }

    /// True when a persisted run for this question was interrupted and
    /// can continue from its cursor.
    pub fn is_resumable(&self, question: &str) -> bool {
        matches!(self.status, RunStatus::Pending(_)) && self.question == question
    }

    /// Start a new run on this record.
    ///
    /// A finished run moves into `history`, which keeps at most
    /// `history_limit` turns (oldest dropped first); an interrupted run for
    /// a different question is discarded.
    pub fn begin(mut self, question: &str, history_limit: usize) -> Self {
        if let RunStatus::Finished(outcome) = self.status {
            self.history.push(CompletedTurn {
                question: std::mem::take(&mut self.question),
                generation: self.generation.take(),
                outcome,
                confidence_score: self.confidence_score,
                iterations: self.iterations,
                finished_at: Utc::now().to_rfc3339(),
            });
        }
        let excess = self.history.len().saturating_sub(history_limit);
        self.history.drain(..excess);
        Self {
            history: self.history,
            ..Self::new(question)
        }
    }

    /// Move the cursor to the next step.
    pub fn advance(mut self, next: Step) -> Self {
        self.status = RunStatus::Pending(next);
        self
    }

    /// Close the run.
    pub fn finish(mut self, outcome: Outcome) -> Self {
        self.status = RunStatus::Finished(outcome);
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Finished(_))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self.status {
            RunStatus::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Whether the returned answer passed both self-reflection checks.
    ///
    /// `false` for a forced stop: the answer is returned but unverified.
    pub fn is_verified(&self) -> bool {
        self.outcome() == Some(Outcome::Useful)
    }
}
