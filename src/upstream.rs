//! External collaborator interfaces
//!
//! The vector store and the language model are opaque to the serving
//! layer. They are injected as trait objects so the orchestrator can be
//! driven by real clients in production and by mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single piece of retrieved context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// The text content
    pub content: String,

    /// Where the snippet came from (report name, section, ...)
    pub source: String,

    /// Similarity score assigned by the vector store, if any
    pub score: Option<f64>,
}

impl ContextSnippet {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Snippets without a score are always considered relevant
    pub fn is_relevant(&self, min_score: f64) -> bool {
        self.score.map_or(true, |score| score >= min_score)
    }
}

/// Generation input assembled from the question and its retrieved context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub question: String,
    pub entity: String,
    pub context: String,
}

impl Prompt {
    /// Join relevant snippets into a single context block
    pub fn from_snippets(question: &str, entity: &str, snippets: &[ContextSnippet]) -> Self {
        let context = snippets
            .iter()
            .map(|s| format!("{}:\n{}", s.source, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        Self {
            question: question.to_string(),
            entity: entity.to_string(),
            context,
        }
    }
}

/// Vector store failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RetrievalError {
    pub message: String,
}

impl RetrievalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Language model failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Similarity search over ingested documents
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        entity: &str,
    ) -> std::result::Result<Vec<ContextSnippet>, RetrievalError>;
}

/// Completion call against the hosted language model
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> std::result::Result<String, GenerationError>;
}
