//! # finrag-serve
//!
//! Concurrent query-serving layer for a financial retrieval-augmented
//! question answering service.
//!
//! ## Features
//!
//! - Response cache with per-class TTLs (realtime vs. historical) and LRU eviction
//! - Fixed-window rate limiting per API key
//! - Single-flight de-duplication of identical in-progress queries
//! - Pluggable retriever and generator
//! - Prometheus metrics per entity, kept in a registry owned by the service
//! - Deadlines on every request, with waiters that can give up independently
//!
//! ## Serving a query
//!
//! ```no_run
//! use async_trait::async_trait;
//! use finrag_serve::{
//!     ContextSnippet, GenerationError, Generator, Prompt, QueryOrchestrator, QueryRequest,
//!     RetrievalError, Retriever, ServiceConfig,
//! };
//! use std::sync::Arc;
//!
//! struct Filings;
//!
//! #[async_trait]
//! impl Retriever for Filings {
//!     async fn retrieve(&self, _query: &str, entity: &str)
//!         -> Result<Vec<ContextSnippet>, RetrievalError>
//!     {
//!         Ok(vec![ContextSnippet::new(format!("{} filed a 10-K", entity), "EDGAR").with_score(0.9)])
//!     }
//! }
//!
//! struct Model;
//!
//! #[async_trait]
//! impl Generator for Model {
//!     async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
//!         Ok(format!("Answer about {}", prompt.entity))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = QueryOrchestrator::new(
//!         ServiceConfig::from_env()?,
//!         Arc::new(Filings),
//!         Arc::new(Model),
//!     )?;
//!
//!     let result = orchestrator
//!         .handle_query(QueryRequest::new("api-key-1", "What was Q3 revenue?", "apple"))
//!         .await?;
//!     println!("{} ({})", result.value.answer, result.served_from);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Every failure is a [`QueryError`]. [`QueryError::status_code`] maps it
//! onto the HTTP status an outer API layer should return, and
//! [`QueryError::retry_after`] carries the back-off for rate-limited callers.

pub mod cache;
pub mod config;
pub mod error;
pub mod flight;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limit;
pub mod telemetry;
pub mod upstream;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey, CacheKeyBuilder, CacheStats,
    CacheValue, ResponseCache, TtlClass,
};
pub use config::ServiceConfig;
pub use error::{ErrorKind, QueryError, Result};
pub use flight::{Flight, InFlightRegistry, Role};
pub use metrics::{
    EntityMetrics, MetricsRecorder, MetricsSummary, NoopMetrics, PrometheusMetrics,
};
pub use orchestrator::{
    QueryOrchestrator, QueryOrchestratorBuilder, QueryRequest, QueryResponse, QueryResult,
    ServedFrom,
};
pub use rate_limit::{Admission, RateLimitConfig, RateLimitStatus, RateLimiter};
pub use telemetry::init_tracing;
pub use upstream::{ContextSnippet, GenerationError, Generator, Prompt, RetrievalError, Retriever};
