//! Post-LLM output cleanup.
//!
//! Strips reasoning blocks and markdown fences some models wrap around
//! their answer.

use std::sync::LazyLock;

use regex::Regex;

static THINK_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));

static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n?(.*?)\n?```$").expect("valid regex"));

/// Remove model artifacts from raw output.
///
/// 1. `<think>...</think>` blocks (an unclosed block drops everything after it)
/// 2. A single code fence around the whole answer
/// 3. Surrounding whitespace
pub fn sanitize_llm_output(raw: &str) -> String {
    let mut text = THINK_BLOCK_RE.replace_all(raw, "").to_string();

    if let Some(idx) = text.find("<think>") {
        text.truncate(idx);
    }

    let trimmed = text.trim();
    if let Some(caps) = CODE_FENCE_RE.captures(trimmed) {
        if let Some(inner) = caps.get(1) {
            return inner.as_str().trim().to_string();
        }
    }

    trimmed.to_string()
}
