//! Integration tests for the query orchestrator
//!
//! These tests drive the full request pipeline against mock collaborators:
//! - Single-flight de-duplication under concurrency
//! - Rate limiting ahead of the cache
//! - Failure propagation without caching
//! - Per-request deadlines on shared computations

use async_trait::async_trait;
use finrag_serve::{
    ContextSnippet, ErrorKind, GenerationError, Generator, PrometheusMetrics, Prompt,
    QueryError, QueryOrchestrator, QueryRequest, RateLimitConfig, RetrievalError, Retriever,
    ServedFrom, ServiceConfig, TtlClass,
};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

/// Vector store stand-in that counts calls and can be slow
struct MockRetriever {
    delay: Duration,
    calls: AtomicUsize,
}

impl MockRetriever {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn retrieve(
        &self,
        query: &str,
        entity: &str,
    ) -> Result<Vec<ContextSnippet>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(vec![ContextSnippet::new(
            format!("{} filing excerpt for '{}'", entity, query),
            format!("{} 10-K", entity),
        )
        .with_score(0.9)])
    }
}

/// Language model stand-in; the first `failures` calls fail
struct MockGenerator {
    delay: Duration,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MockGenerator {
    fn new(delay: Duration) -> Arc<Self> {
        Self::failing(delay, 0)
    }

    fn failing(delay: Duration, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.failures.load(Ordering::SeqCst) {
            return Err(GenerationError::new("completion API returned 503"));
        }
        Ok(format!("{}: {}", prompt.entity, prompt.question))
    }
}

fn config_with_limit(max_requests: u32) -> ServiceConfig {
    ServiceConfig {
        rate_limit: RateLimitConfig::new(max_requests, Duration::from_secs(60)),
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_queries_compute_once() {
    let retriever = MockRetriever::new(Duration::from_millis(200));
    let generator = MockGenerator::new(Duration::ZERO);
    let orchestrator = Arc::new(
        QueryOrchestrator::new(config_with_limit(1000), retriever.clone(), generator.clone())
            .unwrap(),
    );

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle_query(QueryRequest::new(
                        format!("client-{}", i),
                        "What was total debt in 2022?",
                        "tesla",
                    ))
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(retriever.calls(), 1);
    assert_eq!(generator.calls(), 1);

    let first = &results[0].value;
    assert!(results.iter().all(|r| &r.value == first));
    assert!(results.iter().all(|r| r.served_from == ServedFrom::Computed));
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn test_rate_limit_applies_before_cache_lookup() {
    let retriever = MockRetriever::new(Duration::ZERO);
    let generator = MockGenerator::new(Duration::ZERO);
    let orchestrator =
        QueryOrchestrator::new(config_with_limit(2), retriever.clone(), generator.clone())
            .unwrap();

    let request = || {
        QueryRequest::new("k1", "Q3 revenue", "apple").ttl_class(TtlClass::Realtime)
    };

    let first = assert_ok!(orchestrator.handle_query(request()).await);
    assert_eq!(first.served_from, ServedFrom::Computed);

    let second = assert_ok!(orchestrator.handle_query(request()).await);
    assert_eq!(second.served_from, ServedFrom::Cache);
    assert_eq!(second.value, first.value);

    let denied = assert_err!(orchestrator.handle_query(request()).await);
    assert_eq!(denied.kind(), ErrorKind::RateLimited);
    assert_eq!(denied.status_code(), 429);
    let retry_after = denied.retry_after().unwrap();
    assert!(retry_after > Duration::from_secs(59));
    assert!(retry_after <= Duration::from_secs(60));

    // The denied request did no downstream work
    assert_eq!(retriever.calls(), 1);
    let stats = orchestrator.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_simultaneous_callers_share_slow_compute() {
    let retriever = MockRetriever::new(Duration::ZERO);
    let generator = MockGenerator::new(Duration::from_millis(500));
    let orchestrator =
        QueryOrchestrator::new(config_with_limit(100), retriever.clone(), generator.clone())
            .unwrap();

    let started = Instant::now();
    let (a, b) = tokio::join!(
        orchestrator.handle_query(QueryRequest::new("alice", "debt 2022", "tesla")),
        orchestrator.handle_query(QueryRequest::new("bob", "debt 2022", "tesla")),
    );
    let elapsed = started.elapsed();

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.value, b.value);
    assert_eq!(generator.calls(), 1);
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_failed_compute_is_not_cached() {
    let retriever = MockRetriever::new(Duration::ZERO);
    let generator = MockGenerator::failing(Duration::ZERO, 1);
    let orchestrator =
        QueryOrchestrator::new(config_with_limit(100), retriever.clone(), generator.clone())
            .unwrap();

    let request = QueryRequest::new("k1", "operating margin", "nvidia");

    let err = assert_err!(orchestrator.handle_query(request.clone()).await);
    assert_eq!(
        err,
        QueryError::Generation("completion API returned 503".to_string())
    );
    assert!(err.is_upstream());
    assert_eq!(err.status_code(), 502);
    assert!(!orchestrator.cache().contains_key(&request.cache_key()).await);
    assert_eq!(orchestrator.in_flight(), 0);

    let retried = assert_ok!(orchestrator.handle_query(request).await);
    assert_eq!(retried.served_from, ServedFrom::Computed);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_failure_reaches_every_waiter() {
    let retriever = MockRetriever::new(Duration::ZERO);
    let generator = MockGenerator::failing(Duration::from_millis(100), 1);
    let orchestrator =
        QueryOrchestrator::new(config_with_limit(100), retriever, generator.clone()).unwrap();

    let results = join_all((0..5).map(|i| {
        orchestrator.handle_query(QueryRequest::new(
            format!("client-{}", i),
            "guidance",
            "amd",
        ))
    }))
    .await;

    assert_eq!(generator.calls(), 1);
    for result in results {
        let err = assert_err!(result);
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }
}

#[tokio::test]
async fn test_waiter_deadline_does_not_cancel_shared_compute() {
    let retriever = MockRetriever::new(Duration::ZERO);
    let generator = MockGenerator::new(Duration::from_millis(300));
    let orchestrator =
        QueryOrchestrator::new(config_with_limit(100), retriever, generator.clone()).unwrap();

    let patient = QueryRequest::new("alice", "cash position", "meta");
    let hasty = QueryRequest::new("bob", "cash position", "meta").timeout(Duration::from_millis(50));
    let key = patient.cache_key();

    let (patient_result, hasty_result) = tokio::join!(
        orchestrator.handle_query(patient),
        orchestrator.handle_query(hasty),
    );

    let timeout = assert_err!(hasty_result);
    assert_eq!(timeout.kind(), ErrorKind::Timeout);
    assert_eq!(timeout.status_code(), 504);

    let answer = assert_ok!(patient_result);
    assert_eq!(answer.served_from, ServedFrom::Computed);
    assert_eq!(generator.calls(), 1);
    assert!(orchestrator.cache().contains_key(&key).await);
}

#[tokio::test]
async fn test_abandoned_compute_still_populates_cache() {
    let retriever = MockRetriever::new(Duration::ZERO);
    let generator = MockGenerator::new(Duration::from_millis(100));
    let orchestrator =
        QueryOrchestrator::new(config_with_limit(100), retriever, generator.clone()).unwrap();

    let request = QueryRequest::new("alice", "free cash flow", "apple");
    let key = request.cache_key();

    let err = assert_err!(
        orchestrator
            .handle_query(request.clone().timeout(Duration::from_millis(10)))
            .await
    );
    assert!(matches!(err, QueryError::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(orchestrator.cache().contains_key(&key).await);

    let cached = assert_ok!(orchestrator.handle_query(request).await);
    assert_eq!(cached.served_from, ServedFrom::Cache);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_quota_resets_after_window() {
    let orchestrator = QueryOrchestrator::new(
        config_with_limit(1),
        MockRetriever::new(Duration::ZERO),
        MockGenerator::new(Duration::ZERO),
    )
    .unwrap();
    let request = || QueryRequest::new("k1", "dividend history", "ibm");

    assert_ok!(orchestrator.handle_query(request()).await);
    assert_err!(orchestrator.handle_query(request()).await);
    assert_eq!(orchestrator.rate_limit_status("k1").remaining, 0);

    tokio::time::advance(Duration::from_secs(61)).await;

    let after_reset = assert_ok!(orchestrator.handle_query(request()).await);
    assert_eq!(after_reset.served_from, ServedFrom::Cache);
}

#[tokio::test]
async fn test_identities_have_independent_quotas() {
    let orchestrator = QueryOrchestrator::new(
        config_with_limit(1),
        MockRetriever::new(Duration::ZERO),
        MockGenerator::new(Duration::ZERO),
    )
    .unwrap();

    assert_ok!(orchestrator.handle_query(QueryRequest::new("alice", "eps", "msft")).await);
    assert_err!(orchestrator.handle_query(QueryRequest::new("alice", "eps", "msft")).await);

    let bob = assert_ok!(orchestrator.handle_query(QueryRequest::new("bob", "eps", "msft")).await);
    assert_eq!(bob.served_from, ServedFrom::Cache);

    assert_eq!(orchestrator.rate_limit_status("carol").remaining, 1);
}

#[tokio::test]
async fn test_metrics_follow_request_outcomes() {
    let metrics = Arc::new(PrometheusMetrics::new().unwrap());
    let orchestrator = QueryOrchestrator::builder(
        MockRetriever::new(Duration::ZERO),
        MockGenerator::failing(Duration::ZERO, 1),
    )
    .config(config_with_limit(3))
    .metrics(metrics.clone())
    .build()
    .unwrap();

    let request = || QueryRequest::new("k1", "gross margin", "intel");
    assert_err!(orchestrator.handle_query(request()).await);
    assert_ok!(orchestrator.handle_query(request()).await);
    assert_ok!(orchestrator.handle_query(request()).await);
    assert_err!(orchestrator.handle_query(request()).await);

    let summary = metrics.summary();
    assert_eq!(summary.upstream_errors, 1);
    assert_eq!(summary.cache_misses, 1);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.rate_limited, 1);
    assert_eq!(summary.total_queries, 2);
    assert_eq!(summary.cache_hit_ratio, 0.5);
    assert_eq!(summary.concurrent_requests, 0);
    assert_eq!(summary.cache_entries, 1);

    let intel = &summary.per_entity["intel"];
    assert_eq!(intel.queries, 2);
    assert_eq!(intel.rejections, 2);
    assert_eq!(metrics.latency_buckets("intel").last().map(|(_, count)| *count), Some(2));
    assert!(metrics
        .encode_text()
        .unwrap()
        .contains("financial_rag_rejections_total{entity=\"intel\",kind=\"upstream\"} 1"));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = ServiceConfig {
        min_relevance: 2.0,
        ..Default::default()
    };
    let result = QueryOrchestrator::new(
        config,
        MockRetriever::new(Duration::ZERO),
        MockGenerator::new(Duration::ZERO),
    );
    assert!(matches!(result, Err(QueryError::Config(_))));
}

#[tokio::test]
async fn test_lookalike_requests_get_their_own_answers() {
    let generator = MockGenerator::new(Duration::ZERO);
    let orchestrator = QueryOrchestrator::new(
        config_with_limit(100),
        MockRetriever::new(Duration::ZERO),
        generator.clone(),
    )
    .unwrap();

    let requests = [
        QueryRequest::new("k1", "revenue", "apple").param("currency", "usd"),
        QueryRequest::new("k1", "revenue?currency=usd", "apple"),
        QueryRequest::new("k1", "q3:revenue", "apple"),
        QueryRequest::new("k1", "revenue", "apple:q3"),
    ];

    let mut answers = Vec::new();
    for request in requests {
        let result = assert_ok!(orchestrator.handle_query(request).await);
        assert_eq!(result.served_from, ServedFrom::Computed);
        answers.push(result.value.answer);
    }

    assert_eq!(generator.calls(), 4);
    assert_eq!(answers[1], "apple: revenue?currency=usd");
    assert_eq!(answers[3], "apple:q3: revenue");
    assert_eq!(orchestrator.cache_stats().await.entries, 4);
}

#[tokio::test]
async fn test_unbounded_timeout_is_served() {
    let orchestrator = QueryOrchestrator::new(
        config_with_limit(10),
        MockRetriever::new(Duration::ZERO),
        MockGenerator::new(Duration::ZERO),
    )
    .unwrap();

    let request = QueryRequest::new("k1", "free cash flow", "nvidia").timeout(Duration::MAX);
    let result = assert_ok!(orchestrator.handle_query(request).await);
    assert_eq!(result.served_from, ServedFrom::Computed);
}
