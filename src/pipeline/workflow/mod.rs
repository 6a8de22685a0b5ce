//! Control-flow engine: a cyclic decision graph over Run State with
//! conditional routing, confidence-gated correction and bounded
//! regeneration.

pub mod state;
pub mod stages;
pub mod routing;
pub mod engine;

pub use state::*;
pub use routing::{Correction, EntryRoute, Reflection};
pub use engine::Workflow;

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::collaborators::CollaboratorError;
use crate::pipeline::store::StoreError;

/// Which collaborator a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    RouteClassifier,
    EvidenceSource,
    RelevanceClassifier,
    LiveSearch,
    AnswerGenerator,
    GroundednessClassifier,
    FactualityClassifier,
}

impl Collaborator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RouteClassifier => "route classifier",
            Self::EvidenceSource => "evidence source",
            Self::RelevanceClassifier => "relevance classifier",
            Self::LiveSearch => "live search",
            Self::AnswerGenerator => "answer generator",
            Self::GroundednessClassifier => "groundedness classifier",
            Self::FactualityClassifier => "factuality classifier",
        }
    }
}

impl std::fmt::Display for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single `invoke`.
///
/// The persisted run state is left at the last completed step, so calling
/// `invoke` again with the same key and question resumes from there.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{classifier} returned a non-binary result: {raw:?}")]
    ContractViolation {
        classifier: Collaborator,
        raw: String,
    },

    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: Collaborator,
        reason: String,
    },

    #[error("Run {0} is already executing")]
    RunBusy(String),

    #[error("Run state store error: {0}")]
    Store(#[from] StoreError),
}

/// Flat tag for callers deciding whether to retry, report or fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContractViolation,
    CollaboratorUnavailable,
    RunBusy,
    Store,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContractViolation => "contract_violation",
            Self::CollaboratorUnavailable => "collaborator_unavailable",
            Self::RunBusy => "run_busy",
            Self::Store => "store",
        }
    }
}

impl WorkflowError {
    /// Attribute a collaborator failure to its source.
    pub fn from_collaborator(collaborator: Collaborator, err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::ContractViolation { raw } => Self::ContractViolation {
                classifier: collaborator,
                raw,
            },
            CollaboratorError::Unavailable(reason) => Self::CollaboratorUnavailable {
                collaborator,
                reason,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContractViolation { .. } => ErrorKind::ContractViolation,
            Self::CollaboratorUnavailable { .. } => ErrorKind::CollaboratorUnavailable,
            Self::RunBusy(_) => ErrorKind::RunBusy,
            Self::Store(_) => ErrorKind::Store,
        }
    }
}
