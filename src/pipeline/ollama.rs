use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OllamaConfig;
use crate::pipeline::collaborators::CollaboratorError;

#[derive(Error, Debug)]
pub enum OllamaError {
    #[error("Ollama not reachable at {0}")]
    Connection(String),

    #[error("Ollama returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Failed to parse Ollama response: {0}")]
    ResponseParsing(String),
}

impl From<OllamaError> for CollaboratorError {
    fn from(err: OllamaError) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}

/// Completion and embedding calls against a local model server.
pub trait LlmClient: Send + Sync {
    /// Free-text completion.
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, OllamaError>;

    /// Completion constrained to a JSON object.
    fn generate_json(&self, model: &str, prompt: &str, system: &str)
        -> Result<String, OllamaError>;

    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, OllamaError>;

    /// Names of the locally installed models (`name:tag`).
    fn list_models(&self) -> Result<Vec<String>, OllamaError>;
}

/// Configured models that are not installed on the server.
///
/// An untagged name matches any installed tag of that model. One
/// `/api/tags` call covers every role.
pub fn missing_models(
    client: &dyn LlmClient,
    config: &OllamaConfig,
) -> Result<Vec<String>, OllamaError> {
    let installed = client.list_models()?;
    let mut missing: Vec<String> = Vec::new();
    for wanted in config.models() {
        let present = installed.iter().any(|name| {
            name == wanted || (!wanted.contains(':') && name.starts_with(&format!("{wanted}:")))
        });
        if !present && !missing.iter().any(|m| m == wanted) {
            missing.push(wanted.to_string());
        }
    }
    Ok(missing)
}

/// Ollama HTTP client for local LLM inference.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, OllamaError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OllamaError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &OllamaConfig) -> Result<Self, OllamaError> {
        Self::new(&config.base_url, config.timeout_secs)
    }

    fn map_send_error(&self, e: reqwest::Error) -> OllamaError {
        if e.is_connect() {
            OllamaError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            OllamaError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            OllamaError::HttpClient(e.to_string())
        }
    }

    fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, OllamaError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OllamaError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .map_err(|e| OllamaError::ResponseParsing(e.to_string()))
    }

    fn complete(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        format: Option<&str>,
    ) -> Result<String, OllamaError> {
        tracing::debug!(model, json = format.is_some(), prompt_len = prompt.len(), "Ollama generate");
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
            format,
            options: GenerateOptions { temperature: 0.0 },
        };
        let parsed: GenerateResponse = self.post("/api/generate", &body)?;
        Ok(parsed.response)
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Deserialize)]
struct TagsModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, OllamaError> {
        self.complete(model, prompt, system, None)
    }

    fn generate_json(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
    ) -> Result<String, OllamaError> {
        self.complete(model, prompt, system, Some("json"))
    }

    fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>, OllamaError> {
        let parsed: EmbedResponse = self.post("/api/embed", &EmbedRequest { model, input: text })?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| OllamaError::ResponseParsing("empty embeddings array".into()))
    }

    fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OllamaError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| OllamaError::ResponseParsing(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
pub use mock::{MockLlmClient, RecordedCall};

#[cfg(test)]
mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// One call seen by the mock.
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub model: String,
        pub prompt: String,
        pub system: String,
        pub json: bool,
    }

    /// Replays scripted completions, then a fallback. Embeddings are
    /// letter-frequency vectors so similar texts land close together.
    pub struct MockLlmClient {
        script: Mutex<VecDeque<Result<String, OllamaError>>>,
        fallback: String,
        available_models: Vec<String>,
        calls: Mutex<Vec<RecordedCall>>,
        embed_calls: AtomicUsize,
    }

    impl MockLlmClient {
        pub fn new(response: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: response.to_string(),
                available_models: vec!["qwen2.5:latest".to_string()],
                calls: Mutex::new(Vec::new()),
                embed_calls: AtomicUsize::new(0),
            }
        }

        pub fn scripted(responses: &[&str]) -> Self {
            let client = Self::new("");
            for r in responses {
                client.push(Ok(r.to_string()));
            }
            client
        }

        pub fn push(&self, response: Result<String, OllamaError>) {
            self.script.lock().unwrap().push_back(response);
        }

        pub fn with_models(mut self, models: Vec<String>) -> Self {
            self.available_models = models;
            self
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn embed_calls(&self) -> usize {
            self.embed_calls.load(Ordering::SeqCst)
        }

        fn next(&self, model: &str, prompt: &str, system: &str, json: bool) -> Result<String, OllamaError> {
            self.calls.lock().unwrap().push(RecordedCall {
                model: model.to_string(),
                prompt: prompt.to_string(),
                system: system.to_string(),
                json,
            });
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    impl LlmClient for MockLlmClient {
        fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, OllamaError> {
            self.next(model, prompt, system, false)
        }

        fn generate_json(
            &self,
            model: &str,
            prompt: &str,
            system: &str,
        ) -> Result<String, OllamaError> {
            self.next(model, prompt, system, true)
        }

        fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, OllamaError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0f32; 26];
            for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                v[(c - b'a') as usize] += 1.0;
            }
            Ok(v)
        }

        fn list_models(&self) -> Result<Vec<String>, OllamaError> {
            Ok(self.available_models.clone())
        }
    }
}
