//! Yes/no and route classifiers backed by an `LlmClient`.
//!
//! The model is asked for `{"binary_score": ...}` or `{"datasource": ...}`.
//! A bare `yes`/`no` token is also accepted. Anything else is a contract
//! violation carrying the raw reply.

use std::sync::Arc;

use crate::pipeline::collaborators::{
    BinaryScore, CollaboratorError, DataSource, FactualityClassifier, GroundednessClassifier,
    Passage, RelevanceClassifier, RouteClassifier,
};
use crate::pipeline::ollama::LlmClient;

use super::prompt;
use super::sanitize::sanitize_llm_output;

const SCORE_KEY: &str = "binary_score";
const ROUTE_KEY: &str = "datasource";

/// Pull the verdict token out of a classifier reply.
pub(crate) fn verdict_token(raw: &str, key: &str) -> Result<String, CollaboratorError> {
    let cleaned = sanitize_llm_output(raw);
    match serde_json::from_str::<serde_json::Value>(&cleaned) {
        Ok(serde_json::Value::Object(map)) => map
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CollaboratorError::ContractViolation { raw: raw.to_string() }),
        Ok(serde_json::Value::String(token)) => Ok(token),
        _ => Ok(cleaned),
    }
}

fn parse_score(raw: &str) -> Result<BinaryScore, CollaboratorError> {
    let token = verdict_token(raw, SCORE_KEY)?;
    BinaryScore::parse(&token)
        .map_err(|_| CollaboratorError::ContractViolation { raw: raw.to_string() })
}

fn parse_route(raw: &str) -> Result<DataSource, CollaboratorError> {
    let token = verdict_token(raw, ROUTE_KEY)?;
    DataSource::parse(&token)
        .map_err(|_| CollaboratorError::ContractViolation { raw: raw.to_string() })
}

// ═══════════════════════════════════════════════════════════
// Router
// ═══════════════════════════════════════════════════════════

pub struct LlmRouteClassifier {
    client: Arc<dyn LlmClient>,
    model: String,
    topics: Vec<String>,
}

impl LlmRouteClassifier {
    pub fn new(client: Arc<dyn LlmClient>, model: &str, topics: &[&str]) -> Self {
        Self {
            client,
            model: model.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl RouteClassifier for LlmRouteClassifier {
    fn route(&self, question: &str) -> Result<DataSource, CollaboratorError> {
        let prompt = prompt::route_prompt(&self.topics, question);
        let raw = self
            .client
            .generate_json(&self.model, &prompt, prompt::ROUTER_SYSTEM)?;
        let route = parse_route(&raw)?;
        tracing::info!(model = %self.model, route = route.as_str(), "Routed question");
        Ok(route)
    }
}

// ═══════════════════════════════════════════════════════════
// Graders
// ═══════════════════════════════════════════════════════════

/// Per-passage relevance grader.
pub struct LlmRelevanceGrader {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmRelevanceGrader {
    pub fn new(client: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl RelevanceClassifier for LlmRelevanceGrader {
    fn grade(&self, question: &str, passage: &Passage) -> Result<BinaryScore, CollaboratorError> {
        let prompt = prompt::relevance_prompt(question, passage);
        let raw = self
            .client
            .generate_json(&self.model, &prompt, prompt::RELEVANCE_SYSTEM)?;
        parse_score(&raw)
    }
}

/// Is the answer supported by the documents?
pub struct LlmGroundednessGrader {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmGroundednessGrader {
    pub fn new(client: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl GroundednessClassifier for LlmGroundednessGrader {
    fn grade(
        &self,
        documents: &[Passage],
        generation: &str,
    ) -> Result<BinaryScore, CollaboratorError> {
        let prompt = prompt::groundedness_prompt(documents, generation);
        let raw = self
            .client
            .generate_json(&self.model, &prompt, prompt::GROUNDEDNESS_SYSTEM)?;
        parse_score(&raw)
    }
}

/// Does the answer resolve the question?
pub struct LlmFactualityGrader {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmFactualityGrader {
    pub fn new(client: Arc<dyn LlmClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

impl FactualityClassifier for LlmFactualityGrader {
    fn grade(&self, question: &str, generation: &str) -> Result<BinaryScore, CollaboratorError> {
        let prompt = prompt::factuality_prompt(question, generation);
        let raw = self
            .client
            .generate_json(&self.model, &prompt, prompt::FACTUALITY_SYSTEM)?;
        parse_score(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ollama::{MockLlmClient, OllamaError};

    fn client(reply: &str) -> Arc<MockLlmClient> {
        Arc::new(MockLlmClient::new(reply))
    }

    #[test]
    fn json_score_parsed() {
        assert_eq!(parse_score(r#"{"binary_score": "yes"}"#).unwrap(), BinaryScore::Yes);
        assert_eq!(parse_score(r#"{"binary_score":"No"}"#).unwrap(), BinaryScore::No);
    }

    #[test]
    fn bare_token_accepted() {
        assert_eq!(parse_score(" yes\n").unwrap(), BinaryScore::Yes);
        assert_eq!(parse_score("\"no\"").unwrap(), BinaryScore::No);
    }

    #[test]
    fn fenced_and_thinking_output_accepted() {
        let raw = "<think>hmm</think>```json\n{\"binary_score\": \"yes\"}\n```";
        assert_eq!(parse_score(raw).unwrap(), BinaryScore::Yes);
    }

    #[test]
    fn non_binary_reply_is_violation() {
        for raw in ["maybe", "yes, mostly", r#"{"score": "yes"}"#, r#"{"binary_score": 1}"#, ""] {
            match parse_score(raw) {
                Err(CollaboratorError::ContractViolation { raw: r }) => assert_eq!(r, raw),
                other => panic!("{raw:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn route_parsed_strictly() {
        assert_eq!(
            parse_route(r#"{"datasource": "websearch"}"#).unwrap(),
            DataSource::WebSearch
        );
        assert_eq!(parse_route("vectorstore").unwrap(), DataSource::VectorStore);
        assert!(matches!(
            parse_route(r#"{"datasource": "library"}"#),
            Err(CollaboratorError::ContractViolation { .. })
        ));
    }

    #[test]
    fn router_sends_topics_and_json_request() {
        let llm = client(r#"{"datasource": "vectorstore"}"#);
        let router = LlmRouteClassifier::new(llm.clone(), "qwen2.5", &["agent memory"]);

        assert_eq!(router.route("How do agents remember?").unwrap(), DataSource::VectorStore);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model, "qwen2.5");
        assert!(calls[0].json);
        assert!(calls[0].prompt.contains("- agent memory"));
        assert_eq!(calls[0].system, prompt::ROUTER_SYSTEM);
    }

    #[test]
    fn relevance_grader_includes_passage() {
        let llm = client(r#"{"binary_score": "no"}"#);
        let grader = LlmRelevanceGrader::new(llm.clone(), "mistral-nemo");

        let score = grader.grade("q", &Passage::new("the passage body")).unwrap();
        assert_eq!(score, BinaryScore::No);
        assert!(llm.calls()[0].prompt.contains("the passage body"));
    }

    #[test]
    fn groundedness_grader_sees_all_documents() {
        let llm = client(r#"{"binary_score": "yes"}"#);
        let grader = LlmGroundednessGrader::new(llm.clone(), "mistral-nemo");

        let docs = vec![Passage::new("doc one"), Passage::new("doc two")];
        assert!(grader.grade(&docs, "an answer").unwrap().is_yes());
        let prompt = &llm.calls()[0].prompt;
        assert!(prompt.contains("doc one\n\ndoc two"));
        assert!(prompt.contains("an answer"));
    }

    #[test]
    fn factuality_grader_violation_carries_raw() {
        let llm = client("I think so");
        let grader = LlmFactualityGrader::new(llm, "mistral-nemo");
        let err = grader.grade("q", "a").unwrap_err();
        assert_eq!(
            err,
            CollaboratorError::ContractViolation { raw: "I think so".into() }
        );
    }

    #[test]
    fn transport_failure_is_unavailable() {
        let llm = Arc::new(MockLlmClient::new(""));
        llm.push(Err(OllamaError::Connection("http://localhost:11434".into())));
        let grader = LlmRelevanceGrader::new(llm, "m");
        assert!(matches!(
            grader.grade("q", &Passage::new("p")),
            Err(CollaboratorError::Unavailable(_))
        ));
    }
}
