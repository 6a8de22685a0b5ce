//! Conditional edges: the entry router, the correction gate after
//! filtering, and the self-reflection gate after generation.

use serde::Serialize;

use crate::pipeline::collaborators::{
    DataSource, FactualityClassifier, GroundednessClassifier, RouteClassifier,
};

use super::state::RunState;
use super::{Collaborator, WorkflowError};

/// Destination of the conditional entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRoute {
    EvidenceRetrieval,
    LiveSearch,
}

/// Correction gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    /// Evidence is good enough; generate.
    Correct,
    /// Escalate to live search first.
    NotCorrect,
}

/// Self-reflection gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reflection {
    /// Iteration budget exhausted; accept the last answer unverified.
    Stop,
    /// Not grounded; generate again from the same evidence.
    Regenerate,
    /// Grounded and resolves the question.
    Useful,
    /// Grounded but does not resolve the question; fetch more evidence.
    NotUseful,
}

/// Ask the route classifier once. No retry.
pub fn route_question(
    router: &dyn RouteClassifier,
    question: &str,
) -> Result<EntryRoute, WorkflowError> {
    tracing::info!("Routing question to vector store or web search");
    let source = router
        .route(question)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::RouteClassifier, e))?;

    let route = match source {
        DataSource::VectorStore => EntryRoute::EvidenceRetrieval,
        DataSource::WebSearch => EntryRoute::LiveSearch,
    };
    tracing::info!(data_source = source.as_str(), "Question routed");
    Ok(route)
}

/// `score <= threshold` escalates; anything above generates.
pub fn decide_to_generate(confidence_score: f64, threshold: f64) -> Correction {
    if confidence_score <= threshold {
        tracing::info!(
            confidence_score,
            threshold,
            "Retrieved documents at or below the confidence threshold"
        );
        Correction::NotCorrect
    } else {
        tracing::info!(
            confidence_score,
            threshold,
            "Retrieved documents above the confidence threshold"
        );
        Correction::Correct
    }
}

/// Critique the latest answer.
///
/// Past the iteration budget the gate stops without calling any classifier.
/// Otherwise groundedness is checked first and factuality only for a
/// grounded answer.
pub fn grade_generation(
    groundedness: &dyn GroundednessClassifier,
    factuality: &dyn FactualityClassifier,
    state: &RunState,
    max_iterations: u32,
) -> Result<Reflection, WorkflowError> {
    if state.iterations > max_iterations {
        tracing::warn!(
            iterations = state.iterations,
            max_generations = max_iterations + 1,
            "Generation budget exhausted, returning the latest answer unverified"
        );
        return Ok(Reflection::Stop);
    }

    let generation = state.generation.as_deref().unwrap_or_default();

    tracing::info!(
        iterations = state.iterations,
        max_generations = max_iterations + 1,
        "Grading answer against retrieved documents"
    );
    let grounded = groundedness
        .grade(&state.documents, generation)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::GroundednessClassifier, e))?;
    if !grounded.is_yes() {
        tracing::info!("Answer is not grounded in retrieved documents");
        return Ok(Reflection::Regenerate);
    }

    tracing::info!("Answer is grounded, grading whether it resolves the question");
    let factual = factuality
        .grade(&state.question, generation)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::FactualityClassifier, e))?;
    if factual.is_yes() {
        tracing::info!("Answer resolves the question");
        Ok(Reflection::Useful)
    } else {
        tracing::info!("Answer does not resolve the question");
        Ok(Reflection::NotUseful)
    }
}
