use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application-level constants
pub const APP_NAME: &str = "adaptive-rag";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ═══════════════════════════════════════════════════════════
// Workflow policy
// ═══════════════════════════════════════════════════════════

/// Retrieved evidence at or below this relevant fraction escalates to live search.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Regenerations allowed after the first answer (3 generations in total).
pub const MAX_ITERATIONS: u32 = 2;

/// Candidates pulled from the vector index before reranking.
pub const SEARCH_TOP_K: usize = 10;

/// Passages kept after reranking.
pub const RERANK_TOP_N: usize = 5;

/// Results requested from the live search API per question.
pub const LIVE_SEARCH_MAX_RESULTS: usize = 5;

/// Wikipedia pages summarized per lookup.
pub const WIKIPEDIA_MAX_DOCS: usize = 3;

/// Characters kept from each Wikipedia summary.
pub const WIKIPEDIA_DOC_CHARS_MAX: usize = 2_000;

/// Finished turns kept per run key; older turns are dropped first.
pub const HISTORY_LIMIT: usize = 20;

/// Lifetime of a run lease before another process may take it over.
/// Renewed after every step.
pub const LEASE_TTL_SECS: u64 = 1_800;

/// Delay between lease attempts while waiting on a busy key.
pub const LEASE_POLL_MILLIS: u64 = 200;

/// Topics held by the knowledge base, offered to the route classifier.
pub const KNOWLEDGE_BASE_TOPICS: &[&str] = &[
    "agents",
    "agent memory",
    "prompt engineering",
    "adversarial attacks",
];

// ═══════════════════════════════════════════════════════════
// Model defaults
// ═══════════════════════════════════════════════════════════

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_ROUTER_MODEL: &str = "qwen2.5";
pub const DEFAULT_GRADER_MODEL: &str = "mistral-nemo";
pub const DEFAULT_GENERATION_MODEL: &str = "phi4";
pub const DEFAULT_COMPRESSION_MODEL: &str = "mistral";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

pub const DEFAULT_TAVILY_URL: &str = "https://api.tavily.com";
pub const DEFAULT_WIKIPEDIA_URL: &str = "https://en.wikipedia.org";

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "adaptive_rag=info,warn"
}

/// Get the application data directory (`~/.adaptive-rag/`).
///
/// Falls back to the working directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!(".{APP_NAME}"))
}

/// Default location of the persisted run-state database.
pub fn default_runs_db() -> PathBuf {
    app_data_dir().join("runs.db")
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// What an invocation does when its run key is already executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Block until the in-flight run under the same key finishes.
    Wait,
    /// Fail immediately with `WorkflowError::RunBusy`.
    Reject,
}

/// Engine policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Correction gate threshold: `score <= threshold` escalates to live search.
    pub confidence_threshold: f64,
    /// Generation attempts beyond the first before a forced stop.
    pub max_iterations: u32,
    /// Same-key concurrency policy.
    pub busy_policy: BusyPolicy,
    /// Finished turns retained in `history`.
    pub history_limit: usize,
    pub lease_ttl_secs: u64,
    pub lease_poll_millis: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            max_iterations: MAX_ITERATIONS,
            busy_policy: BusyPolicy::Wait,
            history_limit: HISTORY_LIMIT,
            lease_ttl_secs: LEASE_TTL_SECS,
            lease_poll_millis: LEASE_POLL_MILLIS,
        }
    }
}

/// Ollama endpoint and per-role model names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub router_model: String,
    pub grader_model: String,
    pub generation_model: String,
    pub compression_model: String,
    pub embedding_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            timeout_secs: DEFAULT_OLLAMA_TIMEOUT_SECS,
            router_model: DEFAULT_ROUTER_MODEL.to_string(),
            grader_model: DEFAULT_GRADER_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            compression_model: DEFAULT_COMPRESSION_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

impl OllamaConfig {
    /// Defaults overridden by `OLLAMA_HOST` and `ADAPTIVE_RAG_*_MODEL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let pick = |key: &str, fallback: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
        };

        let base_url = pick("OLLAMA_HOST", defaults.base_url);
        let base_url = if base_url.starts_with("http://") || base_url.starts_with("https://") {
            base_url
        } else {
            format!("http://{base_url}")
        };

        Self {
            base_url,
            timeout_secs: lookup("ADAPTIVE_RAG_OLLAMA_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.timeout_secs),
            router_model: pick("ADAPTIVE_RAG_ROUTER_MODEL", defaults.router_model),
            grader_model: pick("ADAPTIVE_RAG_GRADER_MODEL", defaults.grader_model),
            generation_model: pick("ADAPTIVE_RAG_GENERATION_MODEL", defaults.generation_model),
            compression_model: pick("ADAPTIVE_RAG_COMPRESSION_MODEL", defaults.compression_model),
            embedding_model: pick("ADAPTIVE_RAG_EMBEDDING_MODEL", defaults.embedding_model),
        }
    }

    /// Every configured model, in role order (may repeat).
    pub fn models(&self) -> [&str; 5] {
        [
            self.router_model.as_str(),
            self.grader_model.as_str(),
            self.generation_model.as_str(),
            self.compression_model.as_str(),
            self.embedding_model.as_str(),
        ]
    }
}

/// Live search tool settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub tavily_url: String,
    pub tavily_api_key: Option<String>,
    pub tavily_max_results: usize,
    pub wikipedia_url: String,
    pub wikipedia_max_docs: usize,
    pub wikipedia_chars_max: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_url: DEFAULT_TAVILY_URL.to_string(),
            tavily_api_key: None,
            tavily_max_results: LIVE_SEARCH_MAX_RESULTS,
            wikipedia_url: DEFAULT_WIKIPEDIA_URL.to_string(),
            wikipedia_max_docs: WIKIPEDIA_MAX_DOCS,
            wikipedia_chars_max: WIKIPEDIA_DOC_CHARS_MAX,
        }
    }
}

impl SearchConfig {
    /// Reads `TAVILY_API_KEY` and `ADAPTIVE_RAG_WIKIPEDIA_URL`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            tavily_api_key: non_blank("TAVILY_API_KEY"),
            wikipedia_url: non_blank("ADAPTIVE_RAG_WIKIPEDIA_URL").unwrap_or(defaults.wikipedia_url.clone()),
            ..defaults
        }
    }
}
