//! Answer generation over a compressed evidence set.
//!
//! Compression runs the extractor once per passage. Metadata is carried
//! over and passages the model answers `NO_OUTPUT` for are dropped.

use std::sync::Arc;

use crate::pipeline::collaborators::{AnswerGenerator, CollaboratorError, Passage};
use crate::pipeline::ollama::LlmClient;

use super::prompt::{self, NO_OUTPUT};
use super::sanitize::sanitize_llm_output;

pub struct LlmAnswerGenerator {
    client: Arc<dyn LlmClient>,
    generation_model: String,
    compression_model: String,
}

impl LlmAnswerGenerator {
    pub fn new(client: Arc<dyn LlmClient>, generation_model: &str, compression_model: &str) -> Self {
        Self {
            client,
            generation_model: generation_model.to_string(),
            compression_model: compression_model.to_string(),
        }
    }

    fn extract(&self, passage: &Passage, question: &str) -> Result<Option<Passage>, CollaboratorError> {
        let prompt = prompt::extraction_prompt(question, passage);
        let raw = self
            .client
            .generate(&self.compression_model, &prompt, prompt::EXTRACTION_SYSTEM)?;
        let extracted = sanitize_llm_output(&raw);

        // sanitize_llm_output already trimmed; only the bare marker means empty.
        if extracted.is_empty() || extracted == NO_OUTPUT {
            return Ok(None);
        }
        Ok(Some(Passage {
            content: extracted,
            metadata: passage.metadata.clone(),
        }))
    }
}

impl AnswerGenerator for LlmAnswerGenerator {
    fn compress(
        &self,
        passages: &[Passage],
        question: &str,
    ) -> Result<Vec<Passage>, CollaboratorError> {
        let mut kept = Vec::with_capacity(passages.len());
        for passage in passages {
            if let Some(extracted) = self.extract(passage, question)? {
                kept.push(extracted);
            }
        }
        tracing::info!(
            input = passages.len(),
            kept = kept.len(),
            model = %self.compression_model,
            "Compressed evidence"
        );
        Ok(kept)
    }

    fn generate(&self, context: &[Passage], question: &str) -> Result<String, CollaboratorError> {
        let prompt = prompt::generation_prompt(context, question);
        let raw = self
            .client
            .generate(&self.generation_model, &prompt, prompt::GENERATION_SYSTEM)?;
        Ok(sanitize_llm_output(&raw))
    }
}
