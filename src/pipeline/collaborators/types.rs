use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A unit of text evidence, retrieved or synthesized, with optional metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Passage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Two-valued verdict of every yes/no classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryScore {
    Yes,
    No,
}

impl BinaryScore {
    /// Exact, case-insensitive match on `yes` / `no` (surrounding whitespace ignored).
    pub fn parse(raw: &str) -> Result<Self, CollaboratorError> {
        let token = raw.trim();
        if token.eq_ignore_ascii_case("yes") {
            Ok(Self::Yes)
        } else if token.eq_ignore_ascii_case("no") {
            Ok(Self::No)
        } else {
            Err(CollaboratorError::ContractViolation {
                raw: raw.to_string(),
            })
        }
    }

    pub fn is_yes(self) -> bool {
        self == Self::Yes
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

/// Where the route classifier sends a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    VectorStore,
    WebSearch,
}

impl DataSource {
    /// Accepts exactly `vectorstore` or `websearch`, case-insensitive.
    pub fn parse(raw: &str) -> Result<Self, CollaboratorError> {
        let token = raw.trim();
        if token.eq_ignore_ascii_case("vectorstore") {
            Ok(Self::VectorStore)
        } else if token.eq_ignore_ascii_case("websearch") {
            Ok(Self::WebSearch)
        } else {
            Err(CollaboratorError::ContractViolation {
                raw: raw.to_string(),
            })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VectorStore => "vectorstore",
            Self::WebSearch => "websearch",
        }
    }
}

/// Failure reported by a collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Transport, model or service failure.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// Output outside the collaborator's contract (e.g. a non-binary verdict).
    #[error("Unexpected collaborator output: {raw:?}")]
    ContractViolation { raw: String },
}
