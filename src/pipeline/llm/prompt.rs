//! Prompt templates for routing, grading, extraction and generation.
//!
//! Classifier prompts ask for a one-key JSON object; the caller parses
//! it strictly.

use crate::pipeline::collaborators::Passage;

/// Marker the extractor answers with when a passage has nothing relevant.
pub const NO_OUTPUT: &str = "NO_OUTPUT";

// ═══════════════════════════════════════════════════════════
// System prompts
// ═══════════════════════════════════════════════════════════

pub const ROUTER_SYSTEM: &str = "You route user questions to a knowledge base or to a web search. \
Respond with a JSON object with a single key \"datasource\" whose value is \
either \"vectorstore\" or \"websearch\". No other text.";

pub const RELEVANCE_SYSTEM: &str = "You grade whether a retrieved document is relevant to a user question. \
A document is relevant when it contains keywords or meaning related to the question. \
Respond with a JSON object with a single key \"binary_score\" whose value is \"yes\" or \"no\". \
No other text.";

pub const GROUNDEDNESS_SYSTEM: &str = "You grade whether an answer is grounded in and supported by a set of documents. \
Respond with a JSON object with a single key \"binary_score\": \"yes\" when every claim \
is supported by the documents, \"no\" otherwise. No other text.";

pub const FACTUALITY_SYSTEM: &str = "You grade whether an answer addresses and resolves a question. \
Respond with a JSON object with a single key \"binary_score\": \"yes\" when it does, \
\"no\" when it does not. No other text.";

pub const GENERATION_SYSTEM: &str = "You answer questions using only the retrieved context you are given. \
If the context does not contain the answer, say that you do not know. Do not invent facts.";

pub const EXTRACTION_SYSTEM: &str = "You extract, word for word, the parts of a context that help answer a question. \
Do not paraphrase or add anything.";

pub const TOOL_AGENT_SYSTEM: &str = "You pick the search tool that best answers a user question. \
Respond with a JSON object with the key \"tool\" set to one of the listed tool names, \
and optionally the key \"query\" set to the search query to send. No other text.";

// ═══════════════════════════════════════════════════════════
// Builders
// ═══════════════════════════════════════════════════════════

pub fn route_prompt(topics: &[String], question: &str) -> String {
    let topic_list = topics
        .iter()
        .map(|t| format!("- {t}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "The vectorstore holds documents about:\n{topic_list}\n\
         Use the vectorstore for questions on these topics and websearch for everything else.\n\n\
         Question: What is ReAct prompting?\n{{\"datasource\": \"vectorstore\"}}\n\n\
         Question: Who is the current president of the USA?\n{{\"datasource\": \"websearch\"}}\n\n\
         Question: {question}\n"
    )
}

pub fn relevance_prompt(question: &str, passage: &Passage) -> String {
    format!(
        "Retrieved document:\n{}\n\nUser question: {question}\n",
        passage.content
    )
}

pub fn groundedness_prompt(documents: &[Passage], generation: &str) -> String {
    format!(
        "Documents:\n{}\n\nAnswer: {generation}\n",
        format_passages(documents)
    )
}

pub fn factuality_prompt(question: &str, generation: &str) -> String {
    format!("User question: {question}\n\nAnswer: {generation}\n")
}

pub fn generation_prompt(context: &[Passage], question: &str) -> String {
    format!(
        "<context>\n{}\n</context>\n\nQuestion: {question}\nAnswer:",
        format_passages(context)
    )
}

pub fn extraction_prompt(question: &str, passage: &Passage) -> String {
    format!(
        "Given the question and context below, extract any part of the context \
         *AS IS* that is relevant to answer the question. If none of the context \
         is relevant return {NO_OUTPUT}.\n\n\
         Question: {question}\n>>>\n{}\n>>>\nExtracted relevant parts:",
        passage.content
    )
}

/// `tools` are `(name, description)` pairs; `today` is `YYYY-MM-DD`.
pub fn tool_choice_prompt(today: &str, tools: &[(&str, &str)], question: &str) -> String {
    let tool_list = tools
        .iter()
        .map(|(name, description)| format!("- {name}: {description}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Today is {today}.\n\
         Use the tools to answer the question and stick to the tools output.\n\
         You have access to the following tools:\n{tool_list}\n\n\
         Question: {question}\n"
    )
}

/// Passage contents separated by blank lines.
pub fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_prompt_lists_topics() {
        let topics = vec!["agent memory".to_string(), "adversarial attacks".to_string()];
        let prompt = route_prompt(&topics, "What is a jailbreak?");
        assert!(prompt.contains("- agent memory\n- adversarial attacks"));
        assert!(prompt.ends_with("Question: What is a jailbreak?\n"));
    }

    #[test]
    fn passages_joined_with_blank_line() {
        let docs = vec![Passage::new("one"), Passage::new("two")];
        assert_eq!(format_passages(&docs), "one\n\ntwo");
        assert_eq!(format_passages(&[]), "");
    }

    #[test]
    fn generation_prompt_wraps_context() {
        let prompt = generation_prompt(&[Passage::new("ctx")], "q?");
        assert!(prompt.starts_with("<context>\nctx\n</context>"));
        assert!(prompt.contains("Question: q?"));
    }

    #[test]
    fn tool_choice_prompt_carries_date_and_tools() {
        let tools = [("wikipedia_search", "encyclopedia"), ("tavily_search", "real time")];
        let prompt = tool_choice_prompt("2024-05-01", &tools, "Who won?");
        assert!(prompt.starts_with("Today is 2024-05-01.\n"));
        assert!(prompt.contains("- wikipedia_search: encyclopedia\n- tavily_search: real time"));
        assert!(prompt.ends_with("Question: Who won?\n"));
    }

    #[test]
    fn extraction_prompt_names_marker() {
        let prompt = extraction_prompt("q", &Passage::new("body"));
        assert!(prompt.contains(NO_OUTPUT));
        assert!(prompt.contains(">>>\nbody\n>>>"));
    }
}
