//! Live Search: a tool-selecting agent over Wikipedia and Tavily.
//!
//! The router model reads the question, today's date and the tool list,
//! and answers with the tool to call. The chosen tool's output becomes
//! the single passage the workflow appends.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{self, SearchConfig};
use crate::pipeline::collaborators::{CollaboratorError, LiveSearchSource, Passage};
use crate::pipeline::llm::prompt::{tool_choice_prompt, TOOL_AGENT_SYSTEM};
use crate::pipeline::llm::sanitize::sanitize_llm_output;
use crate::pipeline::llm::verdict_token;
use crate::pipeline::ollama::LlmClient;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("TAVILY_API_KEY is not set")]
    MissingApiKey,

    #[error("Search API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid search URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to parse search response: {0}")]
    ResponseParsing(String),
}

impl From<SearchError> for CollaboratorError {
    fn from(err: SearchError) -> Self {
        CollaboratorError::Unavailable(err.to_string())
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::blocking::Client, SearchError> {
    reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .user_agent(format!("{}/{}", config::APP_NAME, config::APP_VERSION))
        .build()
        .map_err(|e| SearchError::HttpClient(e.to_string()))
}

fn read_json<R: DeserializeOwned>(
    sent: Result<reqwest::blocking::Response, reqwest::Error>,
) -> Result<R, SearchError> {
    let response = sent.map_err(|e| SearchError::HttpClient(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(SearchError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json()
        .map_err(|e| SearchError::ResponseParsing(e.to_string()))
}

// ═══════════════════════════════════════════════════════════
// Tools
// ═══════════════════════════════════════════════════════════

/// What a tool found: text for the passage plus source URLs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub urls: Vec<String>,
}

/// One search backend the agent may call.
pub trait SearchTool: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shown to the model when it picks a tool.
    fn description(&self) -> &'static str;

    fn run(&self, query: &str) -> Result<ToolOutput, SearchError>;
}

// ── Wikipedia ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageSearchResponse {
    #[serde(default)]
    pub pages: Vec<PageHit>,
}

#[derive(Debug, Deserialize)]
pub struct PageHit {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct PageSummary {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub extract: String,
    #[serde(default)]
    pub content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
pub struct ContentUrls {
    pub desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
pub struct PageUrl {
    pub page: String,
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Page summaries, each cut to `max_chars`, separated by blank lines.
/// Pages without an extract are skipped.
pub fn output_from_summaries(summaries: &[PageSummary], max_chars: usize) -> ToolOutput {
    let kept: Vec<&PageSummary> = summaries
        .iter()
        .filter(|s| !s.extract.trim().is_empty())
        .collect();
    ToolOutput {
        content: kept
            .iter()
            .map(|s| truncate_chars(s.extract.trim(), max_chars))
            .collect::<Vec<_>>()
            .join("\n\n"),
        urls: kept
            .iter()
            .filter_map(|s| s.content_urls.as_ref()?.desktop.as_ref())
            .map(|u| u.page.clone())
            .collect(),
    }
}

/// Wikipedia page summaries through the MediaWiki REST API.
pub struct WikipediaSearch {
    client: reqwest::blocking::Client,
    base_url: String,
    max_docs: usize,
    chars_max: usize,
}

impl WikipediaSearch {
    pub fn new(config: &SearchConfig, timeout_secs: u64) -> Result<Self, SearchError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: config.wikipedia_url.trim_end_matches('/').to_string(),
            max_docs: config.wikipedia_max_docs,
            chars_max: config.wikipedia_chars_max,
        })
    }

    /// `{base}/api/rest_v1/page/summary/{key}` with the key percent-encoded
    /// as a single path segment.
    fn summary_url(&self, key: &str) -> Result<reqwest::Url, SearchError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| SearchError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SearchError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary", key]);
        Ok(url)
    }

    fn search_pages(&self, query: &str) -> Result<Vec<PageHit>, SearchError> {
        let limit = self.max_docs.to_string();
        let parsed: PageSearchResponse = read_json(
            self.client
                .get(format!("{}/w/rest.php/v1/search/page", self.base_url))
                .query(&[("q", query), ("limit", limit.as_str())])
                .send(),
        )?;
        Ok(parsed.pages)
    }
}

impl SearchTool for WikipediaSearch {
    fn name(&self) -> &'static str {
        "wikipedia_search"
    }

    fn description(&self) -> &'static str {
        "Search Wikipedia. Useful for knowledge about a topic that does not change in real time."
    }

    fn run(&self, query: &str) -> Result<ToolOutput, SearchError> {
        let hits = self.search_pages(query)?;
        let mut summaries = Vec::with_capacity(hits.len());
        for hit in hits.iter().take(self.max_docs) {
            let summary: PageSummary =
                read_json(self.client.get(self.summary_url(&hit.key)?).send())?;
            summaries.push(summary);
        }
        tracing::info!(pages = summaries.len(), "Fetched Wikipedia summaries");
        Ok(output_from_summaries(&summaries, self.chars_max))
    }
}

// ── Tavily ──────────────────────────────────────────────────

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
pub struct TavilyResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
pub struct TavilyResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// The synthesized answer when Tavily gives one, otherwise the result
/// contents one per line.
pub fn output_from_tavily(response: &TavilyResponse) -> ToolOutput {
    let content = match response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        Some(answer) => answer.trim().to_string(),
        None => response
            .results
            .iter()
            .map(|r| r.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    };
    ToolOutput {
        content,
        urls: response
            .results
            .iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| r.url.clone())
            .collect(),
    }
}

/// Question answering over the Tavily search API.
pub struct TavilySearch {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    max_results: usize,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, timeout_secs: u64) -> Result<Self, SearchError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: config.tavily_url.trim_end_matches('/').to_string(),
            api_key: config.tavily_api_key.clone(),
            max_results: config.tavily_max_results,
        })
    }
}

impl SearchTool for TavilySearch {
    fn name(&self) -> &'static str {
        "tavily_search"
    }

    fn description(&self) -> &'static str {
        "Search the web with Tavily. Useful for recent events and anything that changes in real time."
    }

    fn run(&self, query: &str) -> Result<ToolOutput, SearchError> {
        let api_key = self.api_key.as_deref().ok_or(SearchError::MissingApiKey)?;
        let body = TavilyRequest {
            api_key,
            query,
            max_results: self.max_results,
            search_depth: "advanced",
            include_answer: true,
        };
        let response: TavilyResponse = read_json(
            self.client
                .post(format!("{}/search", self.base_url))
                .json(&body)
                .send(),
        )?;
        tracing::info!(results = response.results.len(), "Fetched Tavily results");
        Ok(output_from_tavily(&response))
    }
}

// ═══════════════════════════════════════════════════════════
// Agent
// ═══════════════════════════════════════════════════════════

/// The model's pick: a tool name and an optional rewritten query.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolChoice {
    pub tool: String,
    pub query: Option<String>,
}

/// Parse a tool choice, accepting only names in `tools`.
///
/// Anything else is a `ContractViolation` carrying the raw reply.
pub fn parse_tool_choice(raw: &str, tools: &[&str]) -> Result<ToolChoice, CollaboratorError> {
    let token = verdict_token(raw, "tool")?;
    let name = token.trim().to_lowercase();
    if !tools.contains(&name.as_str()) {
        return Err(CollaboratorError::ContractViolation { raw: raw.to_string() });
    }

    let query = serde_json::from_str::<serde_json::Value>(&sanitize_llm_output(raw))
        .ok()
        .and_then(|v| v.get("query")?.as_str().map(str::trim).map(str::to_string))
        .filter(|q| !q.is_empty());

    Ok(ToolChoice { tool: name, query })
}

/// Live search that lets the router model choose among its tools.
pub struct ToolAgent {
    client: Arc<dyn LlmClient>,
    model: String,
    tools: Vec<Box<dyn SearchTool>>,
}

impl ToolAgent {
    pub fn new(client: Arc<dyn LlmClient>, model: &str, tools: Vec<Box<dyn SearchTool>>) -> Self {
        Self {
            client,
            model: model.to_string(),
            tools,
        }
    }

    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    fn choose(&self, question: &str) -> Result<(&dyn SearchTool, String), CollaboratorError> {
        let [only] = self.tools.as_slice() else {
            return self.ask_model(question);
        };
        Ok((only.as_ref(), question.to_string()))
    }

    fn ask_model(&self, question: &str) -> Result<(&dyn SearchTool, String), CollaboratorError> {
        if self.tools.is_empty() {
            return Err(CollaboratorError::Unavailable("no search tools configured".into()));
        }
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let listing: Vec<(&str, &str)> =
            self.tools.iter().map(|t| (t.name(), t.description())).collect();
        let prompt = tool_choice_prompt(&today, &listing, question);

        let raw = self.client.generate_json(&self.model, &prompt, TOOL_AGENT_SYSTEM)?;
        let choice = parse_tool_choice(&raw, &self.tool_names())?;
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == choice.tool)
            .ok_or_else(|| CollaboratorError::ContractViolation { raw: raw.clone() })?;
        Ok((tool.as_ref(), choice.query.unwrap_or_else(|| question.to_string())))
    }
}

impl LiveSearchSource for ToolAgent {
    fn search(&self, question: &str) -> Result<Passage, CollaboratorError> {
        let (tool, query) = self.choose(question)?;
        tracing::info!(tool = tool.name(), "Calling search tool");

        let output = tool.run(&query)?;
        if output.content.is_empty() {
            tracing::warn!(tool = tool.name(), "Search tool returned nothing");
        }

        let urls: Vec<serde_json::Value> = output.urls.into_iter().map(Into::into).collect();
        Ok(Passage::new(output.content)
            .with_metadata("source", "live_search")
            .with_metadata("tool", tool.name())
            .with_metadata("urls", urls))
    }
}
