//! Collaborator contracts consumed by the workflow engine.
//!
//! Every model, index and search service sits behind one of these traits.
//! The engine receives them at construction time, so tests substitute the
//! scripted stand-ins in `mock`.

pub mod types;
#[cfg(test)]
pub mod mock;

pub use types::*;

use std::sync::Arc;

/// Similarity search + reranking over the indexed knowledge base.
pub trait EvidenceSource: Send + Sync {
    /// Ranked passages for the question, best first. May be empty.
    fn search(&self, question: &str) -> Result<Vec<Passage>, CollaboratorError>;
}

/// Tool-backed live lookup returning one synthesized passage.
pub trait LiveSearchSource: Send + Sync {
    fn search(&self, question: &str) -> Result<Passage, CollaboratorError>;
}

/// Is this passage relevant to the question?
pub trait RelevanceClassifier: Send + Sync {
    fn grade(&self, question: &str, passage: &Passage) -> Result<BinaryScore, CollaboratorError>;
}

/// Knowledge base or live search?
pub trait RouteClassifier: Send + Sync {
    fn route(&self, question: &str) -> Result<DataSource, CollaboratorError>;
}

/// Answer generation from a compressed evidence set.
pub trait AnswerGenerator: Send + Sync {
    /// Keep only the question-relevant spans of each passage. Passages with
    /// nothing relevant are dropped.
    fn compress(&self, passages: &[Passage], question: &str)
        -> Result<Vec<Passage>, CollaboratorError>;

    fn generate(&self, context: &[Passage], question: &str) -> Result<String, CollaboratorError>;
}

/// Is the answer supported by the evidence?
pub trait GroundednessClassifier: Send + Sync {
    fn grade(&self, documents: &[Passage], generation: &str)
        -> Result<BinaryScore, CollaboratorError>;
}

/// Does the answer resolve the question?
pub trait FactualityClassifier: Send + Sync {
    fn grade(&self, question: &str, generation: &str) -> Result<BinaryScore, CollaboratorError>;
}

/// The full set of collaborators handed to the engine.
pub struct Collaborators {
    pub router: Box<dyn RouteClassifier>,
    pub evidence: Box<dyn EvidenceSource>,
    pub relevance: Box<dyn RelevanceClassifier>,
    pub live_search: Box<dyn LiveSearchSource>,
    pub generator: Box<dyn AnswerGenerator>,
    pub groundedness: Box<dyn GroundednessClassifier>,
    pub factuality: Box<dyn FactualityClassifier>,
}

// ── Shared handles ──────────────────────────────────────
// One model-backed instance often serves several roles; `Arc` handles
// satisfy the traits directly.

impl<T: EvidenceSource + ?Sized> EvidenceSource for Arc<T> {
    fn search(&self, question: &str) -> Result<Vec<Passage>, CollaboratorError> {
        (**self).search(question)
    }
}

impl<T: LiveSearchSource + ?Sized> LiveSearchSource for Arc<T> {
    fn search(&self, question: &str) -> Result<Passage, CollaboratorError> {
        (**self).search(question)
    }
}

impl<T: RelevanceClassifier + ?Sized> RelevanceClassifier for Arc<T> {
    fn grade(&self, question: &str, passage: &Passage) -> Result<BinaryScore, CollaboratorError> {
        (**self).grade(question, passage)
    }
}

impl<T: RouteClassifier + ?Sized> RouteClassifier for Arc<T> {
    fn route(&self, question: &str) -> Result<DataSource, CollaboratorError> {
        (**self).route(question)
    }
}

impl<T: AnswerGenerator + ?Sized> AnswerGenerator for Arc<T> {
    fn compress(
        &self,
        passages: &[Passage],
        question: &str,
    ) -> Result<Vec<Passage>, CollaboratorError> {
        (**self).compress(passages, question)
    }

    fn generate(&self, context: &[Passage], question: &str) -> Result<String, CollaboratorError> {
        (**self).generate(context, question)
    }
}

impl<T: GroundednessClassifier + ?Sized> GroundednessClassifier for Arc<T> {
    fn grade(
        &self,
        documents: &[Passage],
        generation: &str,
    ) -> Result<BinaryScore, CollaboratorError> {
        (**self).grade(documents, generation)
    }
}

impl<T: FactualityClassifier + ?Sized> FactualityClassifier for Arc<T> {
    fn grade(&self, question: &str, generation: &str) -> Result<BinaryScore, CollaboratorError> {
        (**self).grade(question, generation)
    }
}
