//! Stage execution contracts.
//!
//! Every stage reads a Run State snapshot and returns a complete updated
//! snapshot. A failing stage returns an error and no state, so nothing it
//! touched is ever persisted. The cursor is moved by the engine.

use crate::pipeline::collaborators::{
    AnswerGenerator, EvidenceSource, LiveSearchSource, Passage, RelevanceClassifier,
};

use super::state::RunState;
use super::{Collaborator, WorkflowError};

/// Replace `documents` with the ranked passages for the question.
///
/// An empty result is valid and flows on to filtering.
pub fn retrieve(
    evidence: &dyn EvidenceSource,
    state: &RunState,
) -> Result<RunState, WorkflowError> {
    tracing::info!("Performing retrieval");
    let documents = evidence
        .search(&state.question)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::EvidenceSource, e))?;
    tracing::info!(count = documents.len(), "Retrieved documents");

    Ok(RunState {
        documents,
        ..state.clone()
    })
}

/// Keep the relevant passages (input order preserved) and record the
/// relevant fraction as `confidence_score`.
pub fn grade_documents(
    classifier: &dyn RelevanceClassifier,
    state: &RunState,
) -> Result<RunState, WorkflowError> {
    tracing::info!(count = state.documents.len(), "Grading documents");
    let total = state.documents.len();
    let mut relevant: Vec<Passage> = Vec::with_capacity(total);

    for passage in &state.documents {
        let score = classifier
            .grade(&state.question, passage)
            .map_err(|e| WorkflowError::from_collaborator(Collaborator::RelevanceClassifier, e))?;
        if score.is_yes() {
            tracing::debug!("Document is relevant");
            relevant.push(passage.clone());
        } else {
            tracing::debug!("Document is not relevant");
        }
    }

    let confidence_score = confidence(relevant.len(), total);
    tracing::info!(
        relevant = relevant.len(),
        total,
        confidence_score,
        "Graded documents"
    );

    Ok(RunState {
        documents: relevant,
        confidence_score: Some(confidence_score),
        ..state.clone()
    })
}

/// Append one live-search passage to the evidence set.
pub fn web_search(
    source: &dyn LiveSearchSource,
    state: &RunState,
) -> Result<RunState, WorkflowError> {
    tracing::info!(existing = state.documents.len(), "Performing live search");
    let passage = source
        .search(&state.question)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::LiveSearch, e))?;

    let mut documents = state.documents.clone();
    documents.push(passage);

    Ok(RunState {
        documents,
        ..state.clone()
    })
}

/// Compress the evidence, generate an answer, count the attempt.
///
/// The compressed set replaces `documents`. This is the only place
/// `iterations` changes.
pub fn generate(
    generator: &dyn AnswerGenerator,
    state: &RunState,
) -> Result<RunState, WorkflowError> {
    tracing::info!("Compressing documents");
    let compressed = generator
        .compress(&state.documents, &state.question)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::AnswerGenerator, e))?;
    tracing::info!(
        before = state.documents.len(),
        after = compressed.len(),
        "Compressed documents"
    );

    tracing::info!(attempt = state.iterations + 1, "Generating answer");
    let generation = generator
        .generate(&compressed, &state.question)
        .map_err(|e| WorkflowError::from_collaborator(Collaborator::AnswerGenerator, e))?;

    Ok(RunState {
        documents: compressed,
        generation: Some(generation),
        iterations: state.iterations + 1,
        ..state.clone()
    })
}

/// `round(relevant / total, 4)`, or `0.0` for an empty evidence set.
pub fn confidence(relevant: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let ratio = relevant as f64 / total as f64;
    (ratio * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::collaborators::mock::*;
    use crate::pipeline::collaborators::{BinaryScore, CollaboratorError};
    use crate::pipeline::workflow::ErrorKind;

    fn state_with(docs: &[&str]) -> RunState {
        RunState {
            documents: docs.iter().map(|d| Passage::new(*d)).collect(),
            ..RunState::new("What is chain-of-thought prompting?")
        }
    }

    #[test]
    fn confidence_is_rounded_fraction() {
        assert_eq!(confidence(3, 4), 0.75);
        assert_eq!(confidence(1, 3), 0.3333);
        assert_eq!(confidence(2, 3), 0.6667);
        assert_eq!(confidence(5, 5), 1.0);
        assert_eq!(confidence(0, 7), 0.0);
    }

    #[test]
    fn confidence_zero_for_empty_set() {
        assert_eq!(confidence(0, 0), 0.0);
    }

    #[test]
    fn confidence_matches_r_over_n_for_all_small_sets() {
        for n in 1..=12usize {
            for r in 0..=n {
                let docs: Vec<String> = (0..n)
                    .map(|i| if i < r { format!("keep {i}") } else { format!("drop {i}") })
                    .collect();
                let state = RunState {
                    documents: docs.iter().map(|d| Passage::new(d.as_str())).collect(),
                    ..RunState::new("q")
                };
                let graded = grade_documents(&MarkerRelevance::new("keep"), &state).unwrap();
                let expected = ((r as f64 / n as f64) * 10_000.0).round() / 10_000.0;
                assert_eq!(graded.confidence_score, Some(expected));
                assert_eq!(graded.documents.len(), r);
            }
        }
    }

    #[test]
    fn retrieve_replaces_documents() {
        let evidence = MockEvidence::from_texts(&["a", "b"]);
        let state = state_with(&["stale"]);
        let next = retrieve(&evidence, &state).unwrap();
        assert_eq!(next.documents, vec![Passage::new("a"), Passage::new("b")]);
        assert_eq!(next.question, state.question);
    }

    #[test]
    fn retrieve_empty_result_is_not_an_error() {
        let evidence = MockEvidence::new(vec![]);
        let next = retrieve(&evidence, &state_with(&[])).unwrap();
        assert!(next.documents.is_empty());
    }

    #[test]
    fn retrieve_failure_is_unavailable() {
        let evidence = MockEvidence::failing(CollaboratorError::Unavailable("index down".into()));
        let err = retrieve(&evidence, &state_with(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollaboratorUnavailable);
    }

    #[test]
    fn grading_preserves_input_order() {
        let classifier = ScriptedGrader::sequence(
            vec![BinaryScore::Yes, BinaryScore::No, BinaryScore::Yes, BinaryScore::Yes],
            BinaryScore::No,
        );
        let graded = grade_documents(&classifier, &state_with(&["a", "b", "c", "d"])).unwrap();
        let kept: Vec<&str> = graded.documents.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(kept, vec!["a", "c", "d"]);
        assert_eq!(graded.confidence_score, Some(0.75));
        assert_eq!(classifier.calls(), 4);
    }

    #[test]
    fn grading_empty_set_scores_zero() {
        let classifier = ScriptedGrader::always(BinaryScore::Yes);
        let graded = grade_documents(&classifier, &state_with(&[])).unwrap();
        assert_eq!(graded.confidence_score, Some(0.0));
        assert_eq!(classifier.calls(), 0);
    }

    #[test]
    fn regrading_all_relevant_set_is_idempotent() {
        let classifier = ScriptedGrader::always(BinaryScore::Yes);
        let once = grade_documents(&classifier, &state_with(&["a", "b", "c"])).unwrap();
        let twice = grade_documents(&classifier, &once).unwrap();
        assert_eq!(twice.documents, once.documents);
        assert_eq!(twice.confidence_score, Some(1.0));
    }

    #[test]
    fn grading_contract_violation_is_fatal() {
        let classifier = ScriptedGrader::from_results(
            vec![
                Ok(BinaryScore::Yes),
                Err(CollaboratorError::ContractViolation { raw: "somewhat".into() }),
            ],
            BinaryScore::Yes,
        );
        let err = grade_documents(&classifier, &state_with(&["a", "b", "c"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
    }

    #[test]
    fn web_search_appends_to_existing_documents() {
        let search = MockLiveSearch::new();
        let next = web_search(&search, &state_with(&["a", "b"])).unwrap();
        assert_eq!(next.documents.len(), 3);
        assert_eq!(next.documents[2].content, "live result 1");
    }

    #[test]
    fn web_search_initializes_empty_documents() {
        let search = MockLiveSearch::new();
        let next = web_search(&search, &state_with(&[])).unwrap();
        assert_eq!(next.documents.len(), 1);
    }

    #[test]
    fn web_search_leaves_other_fields_alone() {
        let search = MockLiveSearch::new();
        let mut state = state_with(&["a"]);
        state.confidence_score = Some(0.2);
        state.iterations = 1;
        let next = web_search(&search, &state).unwrap();
        assert_eq!(next.confidence_score, Some(0.2));
        assert_eq!(next.iterations, 1);
    }

    #[test]
    fn generate_increments_iterations_once() {
        let generator = MockGenerator::new();
        let first = generate(&generator, &state_with(&["a"])).unwrap();
        assert_eq!(first.iterations, 1);
        assert_eq!(first.generation.as_deref(), Some("answer 1"));
        let second = generate(&generator, &first).unwrap();
        assert_eq!(second.iterations, 2);
        assert_eq!(second.generation.as_deref(), Some("answer 2"));
        assert_eq!(generator.compress_calls(), 2);
    }

    #[test]
    fn generate_failure_changes_nothing() {
        let generator = MockGenerator::new();
        generator.set_failure(Some(CollaboratorError::Unavailable("timeout".into())));
        let state = state_with(&["a"]);
        let err = generate(&generator, &state).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollaboratorUnavailable);
        assert_eq!(state.iterations, 0);
    }
}
