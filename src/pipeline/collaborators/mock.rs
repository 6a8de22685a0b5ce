//! Deterministic stand-ins for every collaborator.
//!
//! Each mock counts its calls so tests can assert which stages ran.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use super::*;

/// Route classifier returning a fixed result.
pub struct MockRouter {
    result: Result<DataSource, CollaboratorError>,
    calls: AtomicUsize,
}

impl MockRouter {
    pub fn new(route: DataSource) -> Self {
        Self {
            result: Ok(route),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: CollaboratorError) -> Self {
        Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RouteClassifier for MockRouter {
    fn route(&self, _question: &str) -> Result<DataSource, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Evidence source returning a fixed passage list.
pub struct MockEvidence {
    result: Mutex<Result<Vec<Passage>, CollaboratorError>>,
    calls: AtomicUsize,
}

impl MockEvidence {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            result: Mutex::new(Ok(passages)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Passage::new(*t)).collect())
    }

    pub fn failing(err: CollaboratorError) -> Self {
        Self {
            result: Mutex::new(Err(err)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Swap the canned result, e.g. to recover a failing source.
    pub fn set_result(&self, result: Result<Vec<Passage>, CollaboratorError>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EvidenceSource for MockEvidence {
    fn search(&self, _question: &str) -> Result<Vec<Passage>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

/// Yes/no classifier replaying a script, then a fallback verdict.
///
/// Serves as relevance, groundedness or factuality classifier.
pub struct ScriptedGrader {
    script: Mutex<VecDeque<Result<BinaryScore, CollaboratorError>>>,
    fallback: BinaryScore,
    calls: AtomicUsize,
}

impl ScriptedGrader {
    pub fn always(score: BinaryScore) -> Self {
        Self::sequence(vec![], score)
    }

    pub fn sequence(scores: Vec<BinaryScore>, fallback: BinaryScore) -> Self {
        Self::from_results(scores.into_iter().map(Ok).collect(), fallback)
    }

    pub fn from_results(
        results: Vec<Result<BinaryScore, CollaboratorError>>,
        fallback: BinaryScore,
    ) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<BinaryScore, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(self.fallback))
    }
}

impl RelevanceClassifier for ScriptedGrader {
    fn grade(&self, _question: &str, _passage: &Passage) -> Result<BinaryScore, CollaboratorError> {
        self.next()
    }
}

impl GroundednessClassifier for ScriptedGrader {
    fn grade(
        &self,
        _documents: &[Passage],
        _generation: &str,
    ) -> Result<BinaryScore, CollaboratorError> {
        self.next()
    }
}

impl FactualityClassifier for ScriptedGrader {
    fn grade(&self, _question: &str, _generation: &str) -> Result<BinaryScore, CollaboratorError> {
        self.next()
    }
}

/// Relevance classifier that says yes when the passage contains a marker.
pub struct MarkerRelevance {
    marker: String,
}

impl MarkerRelevance {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }
}

impl RelevanceClassifier for MarkerRelevance {
    fn grade(&self, _question: &str, passage: &Passage) -> Result<BinaryScore, CollaboratorError> {
        if passage.content.contains(&self.marker) {
            Ok(BinaryScore::Yes)
        } else {
            Ok(BinaryScore::No)
        }
    }
}

/// Live search returning `live result N` passages.
pub struct MockLiveSearch {
    failure: Option<CollaboratorError>,
    calls: AtomicUsize,
}

impl MockLiveSearch {
    pub fn new() -> Self {
        Self {
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: CollaboratorError) -> Self {
        Self {
            failure: Some(err),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LiveSearchSource for MockLiveSearch {
    fn search(&self, _question: &str) -> Result<Passage, CollaboratorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        Ok(Passage::new(format!("live result {n}")).with_metadata("source", "live_search"))
    }
}

/// Generator answering `answer N`; compression keeps passages unchanged.
pub struct MockGenerator {
    failure: Mutex<Option<CollaboratorError>>,
    generate_calls: AtomicUsize,
    compress_calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            failure: Mutex::new(None),
            generate_calls: AtomicUsize::new(0),
            compress_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failure(&self, failure: Option<CollaboratorError>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn compress_calls(&self) -> usize {
        self.compress_calls.load(Ordering::SeqCst)
    }
}

impl AnswerGenerator for MockGenerator {
    fn compress(
        &self,
        passages: &[Passage],
        _question: &str,
    ) -> Result<Vec<Passage>, CollaboratorError> {
        self.compress_calls.fetch_add(1, Ordering::SeqCst);
        Ok(passages.to_vec())
    }

    fn generate(&self, _context: &[Passage], _question: &str) -> Result<String, CollaboratorError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        let n = self.generate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("answer {n}"))
    }
}

/// Generator that parks inside `generate` until the test opens the gate.
///
/// Signals on the `entered` channel when a call arrives, then waits for a
/// message on the release channel (bounded so a failed test cannot hang).
pub struct GatedGenerator {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedGenerator {
    /// Returns the generator, the `entered` receiver and the release sender.
    pub fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let generator = Self {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (generator, entered_rx, release_tx)
    }
}

impl AnswerGenerator for GatedGenerator {
    fn compress(
        &self,
        passages: &[Passage],
        _question: &str,
    ) -> Result<Vec<Passage>, CollaboratorError> {
        Ok(passages.to_vec())
    }

    fn generate(&self, _context: &[Passage], question: &str) -> Result<String, CollaboratorError> {
        let _ = self.entered.lock().unwrap().send(());
        self.release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| CollaboratorError::Unavailable("gate never opened".into()))?;
        Ok(format!("answer to {question}"))
    }
}
