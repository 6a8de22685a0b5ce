pub mod collaborators;
pub mod ollama;
pub mod llm;
pub mod retrieval;
pub mod search;
pub mod workflow;
pub mod store;

use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;

use crate::config::{self, OllamaConfig, SearchConfig};
use collaborators::{Collaborators, Passage};
use llm::{
    LlmAnswerGenerator, LlmFactualityGrader, LlmGroundednessGrader, LlmRelevanceGrader,
    LlmRouteClassifier,
};
use ollama::{LlmClient, OllamaError};
use retrieval::{
    CachedEmbedder, EmbeddingModel, InMemoryVectorIndex, LexicalReranker, OllamaEmbedder,
    RetrievalError, VectorEvidenceSource,
};
use search::{SearchError, SearchTool, TavilySearch, ToolAgent, WikipediaSearch};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Ollama(#[from] OllamaError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Wire the model-backed collaborators, the vector index over `corpus`
/// and the live search agent.
///
/// With `embedding_cache`, passage embeddings are read from and written to
/// that database, so an unchanged corpus is embedded only once.
pub fn build_collaborators(
    client: Arc<dyn LlmClient>,
    ollama: &OllamaConfig,
    search: &SearchConfig,
    corpus: Vec<Passage>,
    embedding_cache: Option<Connection>,
) -> Result<Collaborators, PipelineError> {
    let ollama_embedder = OllamaEmbedder::new(client.clone(), &ollama.embedding_model);
    let embedder: Box<dyn EmbeddingModel> = match embedding_cache {
        Some(conn) => Box::new(CachedEmbedder::new(
            Box::new(ollama_embedder),
            &ollama.embedding_model,
            conn,
        )),
        None => Box::new(ollama_embedder),
    };

    let index = InMemoryVectorIndex::from_passages(embedder.as_ref(), corpus)?;
    let evidence = VectorEvidenceSource::new(
        embedder,
        Box::new(index),
        Box::new(LexicalReranker),
        config::SEARCH_TOP_K,
        config::RERANK_TOP_N,
    );

    let live_search = ToolAgent::new(
        client.clone(),
        &ollama.router_model,
        search_tools(search, ollama.timeout_secs)?,
    );

    tracing::info!(
        router = %ollama.router_model,
        grader = %ollama.grader_model,
        generator = %ollama.generation_model,
        tools = ?live_search.tool_names(),
        "Assembled collaborators"
    );

    Ok(Collaborators {
        router: Box::new(LlmRouteClassifier::new(
            client.clone(),
            &ollama.router_model,
            config::KNOWLEDGE_BASE_TOPICS,
        )),
        evidence: Box::new(evidence),
        relevance: Box::new(LlmRelevanceGrader::new(client.clone(), &ollama.grader_model)),
        live_search: Box::new(live_search),
        generator: Box::new(LlmAnswerGenerator::new(
            client.clone(),
            &ollama.generation_model,
            &ollama.compression_model,
        )),
        groundedness: Box::new(LlmGroundednessGrader::new(client.clone(), &ollama.grader_model)),
        factuality: Box::new(LlmFactualityGrader::new(client, &ollama.grader_model)),
    })
}

/// Wikipedia always; Tavily only with an API key.
fn search_tools(
    search: &SearchConfig,
    timeout_secs: u64,
) -> Result<Vec<Box<dyn SearchTool>>, SearchError> {
    let mut tools: Vec<Box<dyn SearchTool>> =
        vec![Box::new(WikipediaSearch::new(search, timeout_secs)?)];
    if search.tavily_api_key.is_some() {
        tools.push(Box::new(TavilySearch::new(search, timeout_secs)?));
    } else {
        tracing::info!("TAVILY_API_KEY not set; live search limited to Wikipedia");
    }
    Ok(tools)
}
