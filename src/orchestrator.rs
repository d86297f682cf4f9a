//! Query orchestration
//!
//! Every request walks the same path:
//!
//! ```text
//! RECEIVED -> RATE_CHECK -> DENIED
//!                        -> CACHE_LOOKUP -> HIT
//!                                        -> MISS -> JOIN_OR_COMPUTE -> COMPUTE -> CACHE_WRITE
//!                                                                             -> COMPUTE_FAILED
//! ```
//!
//! The rate check comes first, so a cached answer still costs quota.
//! On a miss the request joins the in-flight computation for its key or
//! starts one. Only the task started by the creator writes the cache, and
//! it does so before the ticket is released. Upstream failures are never
//! retried here and never cached.

use crate::cache::{CacheKey, CacheKeyBuilder, CacheStats, ResponseCache, TtlClass};
use crate::config::{instant_after, ServiceConfig};
use crate::error::{QueryError, Result};
use crate::flight::{InFlightRegistry, Role};
use crate::metrics::{MetricsRecorder, NoopMetrics};
use crate::rate_limit::{redact, Admission, RateLimitStatus, RateLimiter};
use crate::upstream::{Generator, Prompt, Retriever};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where an answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedFrom {
    Cache,
    Computed,
}

impl fmt::Display for ServedFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServedFrom::Cache => write!(f, "cache"),
            ServedFrom::Computed => write!(f, "computed"),
        }
    }
}

/// The answer payload, stored in the cache as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Generated answer text
    pub answer: String,

    /// Subject entity the question was about
    pub entity: String,

    /// Sources of the context the answer was grounded on
    pub sources: Vec<String>,

    /// When the answer was produced
    pub generated_at: DateTime<Utc>,
}

impl QueryResponse {
    /// Answer returned when retrieval found nothing relevant
    pub fn no_context(entity: &str) -> Self {
        Self {
            answer: format!(
                "I don't have enough information about {} to answer this question.",
                entity
            ),
            entity: entity.to_string(),
            sources: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Whether the answer was produced from retrieved context
    pub fn is_grounded(&self) -> bool {
        !self.sources.is_empty()
    }
}

/// Result of a successful request
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub value: QueryResponse,
    pub served_from: ServedFrom,
    /// Time spent inside the orchestrator for this request
    pub latency: Duration,
    /// Age of the cache entry, for cache hits
    pub cache_age: Option<Duration>,
}

/// An inbound query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// API key the request is admitted against
    pub identity: String,
    pub query: String,
    pub entity: String,
    pub ttl_class: TtlClass,
    /// Extra parameters that change the answer and so the cache key
    pub params: Vec<(String, String)>,
    /// Absolute deadline; the service default applies when unset
    pub deadline: Option<Instant>,
}

impl QueryRequest {
    /// Create a request whose TTL class is inferred from the query text
    pub fn new(
        identity: impl Into<String>,
        query: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        let query = query.into();
        Self {
            identity: identity.into(),
            ttl_class: TtlClass::infer(&query),
            query,
            entity: entity.into(),
            params: Vec::new(),
            deadline: None,
        }
    }

    pub fn ttl_class(mut self, ttl_class: TtlClass) -> Self {
        self.ttl_class = ttl_class;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(instant_after(Instant::now(), timeout))
    }

    /// Key shared by the cache and the in-flight registry
    pub fn cache_key(&self) -> CacheKey {
        CacheKeyBuilder::new(&self.entity)
            .query(&self.query)
            .params(self.params.iter().cloned())
            .build()
    }
}

/// Keeps the concurrency gauge balanced even if the request is dropped
struct RequestGauge<'a> {
    metrics: &'a dyn MetricsRecorder,
}

impl<'a> RequestGauge<'a> {
    fn enter(metrics: &'a dyn MetricsRecorder) -> Self {
        metrics.request_started();
        Self { metrics }
    }
}

impl Drop for RequestGauge<'_> {
    fn drop(&mut self) {
        self.metrics.request_finished();
    }
}

/// Request entry point tying the limiter, cache and in-flight registry
/// to the external retriever and generator
pub struct QueryOrchestrator {
    config: ServiceConfig,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    flights: InFlightRegistry<QueryResponse>,
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl QueryOrchestrator {
    /// Build an orchestrator with its own cache and limiter
    pub fn new(
        config: ServiceConfig,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        Self::builder(retriever, generator).config(config).build()
    }

    pub fn builder(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
    ) -> QueryOrchestratorBuilder {
        QueryOrchestratorBuilder {
            retriever,
            generator,
            config: None,
            cache: None,
            limiter: None,
            metrics: None,
        }
    }

    /// Serve one query
    pub async fn handle_query(&self, request: QueryRequest) -> Result<QueryResult> {
        let span = info_span!(
            "query",
            request_id = %Uuid::new_v4(),
            entity = %request.entity,
            identity = %redact(&request.identity),
        );

        async move {
            let _gauge = RequestGauge::enter(self.metrics.as_ref());
            let outcome = self.serve(&request).await;

            match &outcome {
                Ok(result) => {
                    self.metrics
                        .record_query(&request.entity, result.latency, result.served_from);
                    if result.served_from == ServedFrom::Computed {
                        self.metrics.record_cache_size(self.cache.len().await);
                    }
                }
                Err(err) => self.metrics.record_rejection(&request.entity, err.kind()),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn serve(&self, request: &QueryRequest) -> Result<QueryResult> {
        let started = Instant::now();

        if let Admission::Denied { retry_after } = self.limiter.admit(&request.identity) {
            return Err(QueryError::RateLimited { retry_after });
        }

        let key = request.cache_key();

        if let Some(entry) = self.cache.get(&key).await {
            info!("Cache hit for query: {}", self.log_excerpt(&request.query));
            let value: QueryResponse = serde_json::from_str(&entry.value)?;
            return Ok(QueryResult {
                value,
                served_from: ServedFrom::Cache,
                latency: started.elapsed(),
                cache_age: Some(entry.age()),
            });
        }

        info!("Cache miss for query: {}", self.log_excerpt(&request.query));
        let deadline = request
            .deadline
            .unwrap_or_else(|| instant_after(started, self.config.request_timeout));

        let flight = self.flights.join(&key, || self.compute(request, key.clone()));
        if flight.role() == Role::Subscriber {
            debug!("Waiting on in-flight computation for {}", key);
        }

        let value = flight.wait_until(started, deadline).await?;
        Ok(QueryResult {
            value,
            served_from: ServedFrom::Computed,
            latency: started.elapsed(),
            cache_age: None,
        })
    }

    /// Retrieve, generate, and cache; runs once per ticket
    fn compute(
        &self,
        request: &QueryRequest,
        key: CacheKey,
    ) -> impl Future<Output = Result<QueryResponse>> + Send + 'static {
        let retriever = self.retriever.clone();
        let generator = self.generator.clone();
        let cache = self.cache.clone();
        let min_relevance = self.config.min_relevance;
        let query = request.query.clone();
        let entity = request.entity.clone();
        let ttl_class = request.ttl_class;

        async move {
            debug!("Computing answer for {}", key);

            let snippets = retriever.retrieve(&query, &entity).await.map_err(|e| {
                warn!("Retrieval failed for {}: {}", key, e);
                QueryError::from(e)
            })?;

            let relevant: Vec<_> = snippets
                .into_iter()
                .filter(|s| s.is_relevant(min_relevance))
                .collect();

            if relevant.is_empty() {
                warn!("No relevant documents found for {}", key);
                return Ok(QueryResponse::no_context(&entity));
            }

            let prompt = Prompt::from_snippets(&query, &entity, &relevant);
            let answer = generator.generate(&prompt).await.map_err(|e| {
                warn!("Generation failed for {}: {}", key, e);
                QueryError::from(e)
            })?;

            let response = QueryResponse {
                answer,
                entity,
                sources: relevant.into_iter().map(|s| s.source).collect(),
                generated_at: Utc::now(),
            };

            let payload = serde_json::to_string(&response)?;
            cache.put(key.clone(), payload, ttl_class).await;
            debug!("Cached answer for {} ({})", key, ttl_class);

            Ok(response)
        }
    }

    fn log_excerpt(&self, query: &str) -> String {
        let limit = self.config.max_query_log_chars;
        if query.chars().count() <= limit {
            query.to_string()
        } else {
            let excerpt: String = query.chars().take(limit).collect();
            format!("{}...", excerpt)
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn rate_limit_status(&self, identity: &str) -> RateLimitStatus {
        self.limiter.status(identity)
    }

    /// Number of upstream computations currently running
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

/// Builder for [`QueryOrchestrator`]
///
/// Components that are not supplied are created from the configuration.
pub struct QueryOrchestratorBuilder {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    config: Option<ServiceConfig>,
    cache: Option<Arc<ResponseCache>>,
    limiter: Option<Arc<RateLimiter>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl QueryOrchestratorBuilder {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share an existing cache
    pub fn cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share an existing rate limiter
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<QueryOrchestrator> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResponseCache::new(config.cache.clone())));
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(config.rate_limit.clone())));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics));

        info!(
            "Query orchestrator ready (timeout {:?}, min relevance {})",
            config.request_timeout, config.min_relevance
        );

        Ok(QueryOrchestrator {
            config,
            cache,
            limiter,
            flights: InFlightRegistry::new(),
            retriever: self.retriever,
            generator: self.generator,
            metrics,
        })
    }
}
