//! Query metrics
//!
//! The orchestrator reports every request outcome to a [`MetricsRecorder`].
//! [`PrometheusMetrics`] registers its collectors in a [`Registry`] it owns
//! (or one handed to it), so several orchestrators in one process never
//! share counters. An outer layer scrapes it with
//! [`PrometheusMetrics::encode_text`]; operational tooling reads the same
//! numbers through [`PrometheusMetrics::summary`].

use crate::error::{ErrorKind, QueryError, Result};
use crate::orchestrator::ServedFrom;
use prometheus::core::Collector;
use prometheus::proto::{Metric, MetricFamily};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Query latency buckets (seconds), from sub-100ms cache hits to minute-long generations
pub const QUERY_LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

const QUERIES_TOTAL: &str = "financial_rag_queries_total";
const QUERY_LATENCY_SECONDS: &str = "financial_rag_query_latency_seconds";
const REJECTIONS_TOTAL: &str = "financial_rag_rejections_total";
const CONCURRENT_REQUESTS: &str = "financial_rag_concurrent_requests";
const CACHE_SIZE: &str = "financial_rag_cache_size";

/// Passive observer of request outcomes
pub trait MetricsRecorder: Send + Sync {
    /// A request produced an answer
    fn record_query(&self, entity: &str, latency: Duration, served_from: ServedFrom);

    /// A request ended in an error
    fn record_rejection(&self, entity: &str, kind: ErrorKind);

    /// A request entered the pipeline
    fn request_started(&self) {}

    /// A request left the pipeline, whatever its outcome
    fn request_finished(&self) {}

    /// The response cache now holds `entries` answers
    fn record_cache_size(&self, _entries: usize) {}
}

/// Recorder that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    fn record_query(&self, _entity: &str, _latency: Duration, _served_from: ServedFrom) {}

    fn record_rejection(&self, _entity: &str, _kind: ErrorKind) {}
}

/// Counters for one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMetrics {
    pub queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rejections: u64,
    pub average_latency_ms: f64,
}

/// Snapshot of the registered metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub rate_limited: u64,
    pub upstream_errors: u64,
    pub timeouts: u64,
    pub internal_errors: u64,
    pub concurrent_requests: i64,
    pub cache_entries: i64,
    pub average_latency_ms: f64,
    pub uptime_seconds: f64,
    pub queries_per_second: f64,
    pub per_entity: BTreeMap<String, EntityMetrics>,
}

/// Prometheus collectors for the query pipeline
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,

    /// Answered queries - labels: entity, served_from
    queries_total: IntCounterVec,

    /// Answered query latency - labels: entity, served_from
    query_latency_seconds: HistogramVec,

    /// Failed requests - labels: entity, kind
    rejections_total: IntCounterVec,

    concurrent_requests: IntGauge,
    cache_size: IntGauge,
    started: Instant,
}

impl PrometheusMetrics {
    /// Register the collectors in a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the collectors in `registry`
    ///
    /// Fails if the registry already holds collectors with these names.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let queries_total = IntCounterVec::new(
            Opts::new(QUERIES_TOTAL, "Total number of answered financial queries"),
            &["entity", "served_from"],
        )?;
        let query_latency_seconds = HistogramVec::new(
            HistogramOpts::new(QUERY_LATENCY_SECONDS, "Query latency in seconds")
                .buckets(QUERY_LATENCY_BUCKETS.to_vec()),
            &["entity", "served_from"],
        )?;
        let rejections_total = IntCounterVec::new(
            Opts::new(REJECTIONS_TOTAL, "Total number of failed financial queries"),
            &["entity", "kind"],
        )?;
        let concurrent_requests =
            IntGauge::new(CONCURRENT_REQUESTS, "Number of concurrent requests")?;
        let cache_size = IntGauge::new(CACHE_SIZE, "Number of items in cache")?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_latency_seconds.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(concurrent_requests.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;

        Ok(Self {
            registry,
            queries_total,
            query_latency_seconds,
            rejections_total,
            concurrent_requests,
            cache_size,
            started: Instant::now(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Every metric in the registry, in the Prometheus text format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| QueryError::Metrics(e.to_string()))
    }

    /// Cumulative latency histogram of one entity, cache hits and computes combined
    ///
    /// Each pair is a bucket's upper bound in seconds and the number of
    /// answers at or below it.
    pub fn latency_buckets(&self, entity: &str) -> Vec<(f64, u64)> {
        let entity = entity_label(entity);
        let mut buckets: Vec<(f64, u64)> =
            QUERY_LATENCY_BUCKETS.iter().map(|bound| (*bound, 0)).collect();

        for family in self.query_latency_seconds.collect() {
            for metric in family.get_metric() {
                if label(metric, "entity") != entity {
                    continue;
                }
                let observed = metric.get_histogram().get_bucket();
                for (slot, bucket) in buckets.iter_mut().zip(observed) {
                    slot.1 += bucket.get_cumulative_count();
                }
            }
        }

        buckets
    }

    /// Totals and per-entity breakdown read back from the registry
    pub fn summary(&self) -> MetricsSummary {
        let mut per_entity: BTreeMap<String, EntityMetrics> = BTreeMap::new();
        let mut latency_seconds: BTreeMap<String, f64> = BTreeMap::new();
        let mut rejections: BTreeMap<String, u64> = BTreeMap::new();

        for family in self.registry.gather() {
            match family.get_name() {
                QUERIES_TOTAL => {
                    for (metric, entity) in labelled(&family) {
                        let count = metric.get_counter().get_value() as u64;
                        let totals = per_entity.entry(entity).or_default();
                        totals.queries += count;
                        if label(metric, "served_from") == served_from_label(ServedFrom::Cache) {
                            totals.cache_hits += count;
                        } else {
                            totals.cache_misses += count;
                        }
                    }
                }
                QUERY_LATENCY_SECONDS => {
                    for (metric, entity) in labelled(&family) {
                        *latency_seconds.entry(entity).or_default() +=
                            metric.get_histogram().get_sample_sum();
                    }
                }
                REJECTIONS_TOTAL => {
                    for (metric, entity) in labelled(&family) {
                        let count = metric.get_counter().get_value() as u64;
                        per_entity.entry(entity).or_default().rejections += count;
                        *rejections
                            .entry(label(metric, "kind").to_string())
                            .or_default() += count;
                    }
                }
                _ => {}
            }
        }

        for (entity, totals) in per_entity.iter_mut() {
            if totals.queries > 0 {
                let seconds = latency_seconds.get(entity).copied().unwrap_or_default();
                totals.average_latency_ms = seconds * 1000.0 / totals.queries as f64;
            }
        }

        let total: u64 = per_entity.values().map(|e| e.queries).sum();
        let hits: u64 = per_entity.values().map(|e| e.cache_hits).sum();
        let latency_total: f64 = latency_seconds.values().sum();
        let uptime = self.started.elapsed().as_secs_f64();
        let rejected = |kind: ErrorKind| rejections.get(kind_label(kind)).copied().unwrap_or_default();

        let (cache_hit_ratio, average_latency_ms) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                hits as f64 / total as f64,
                latency_total * 1000.0 / total as f64,
            )
        };

        MetricsSummary {
            total_queries: total,
            cache_hits: hits,
            cache_misses: total - hits,
            cache_hit_ratio,
            rate_limited: rejected(ErrorKind::RateLimited),
            upstream_errors: rejected(ErrorKind::Upstream),
            timeouts: rejected(ErrorKind::Timeout),
            internal_errors: rejected(ErrorKind::Internal),
            concurrent_requests: self.concurrent_requests.get(),
            cache_entries: self.cache_size.get(),
            average_latency_ms,
            uptime_seconds: uptime,
            queries_per_second: total as f64 / uptime.max(1.0),
            per_entity,
        }
    }
}

impl MetricsRecorder for PrometheusMetrics {
    fn record_query(&self, entity: &str, latency: Duration, served_from: ServedFrom) {
        let entity = entity_label(entity);
        let labels = [entity.as_str(), served_from_label(served_from)];
        self.queries_total.with_label_values(&labels).inc();
        self.query_latency_seconds
            .with_label_values(&labels)
            .observe(latency.as_secs_f64());
    }

    fn record_rejection(&self, entity: &str, kind: ErrorKind) {
        let entity = entity_label(entity);
        self.rejections_total
            .with_label_values(&[entity.as_str(), kind_label(kind)])
            .inc();
    }

    fn request_started(&self) {
        self.concurrent_requests.inc();
    }

    fn request_finished(&self) {
        self.concurrent_requests.dec();
    }

    fn record_cache_size(&self, entries: usize) {
        self.cache_size.set(i64::try_from(entries).unwrap_or(i64::MAX));
    }
}

/// Entities are case- and whitespace-insensitive, as in cache keys
fn entity_label(entity: &str) -> String {
    entity.trim().to_lowercase()
}

fn served_from_label(served_from: ServedFrom) -> &'static str {
    match served_from {
        ServedFrom::Cache => "cache",
        ServedFrom::Computed => "computed",
    }
}

fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "rate_limited",
        ErrorKind::Upstream => "upstream",
        ErrorKind::Timeout => "timeout",
        ErrorKind::Internal => "internal",
    }
}

fn label<'a>(metric: &'a Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|pair| pair.get_name() == name)
        .map(|pair| pair.get_value())
        .unwrap_or_default()
}

fn labelled(family: &MetricFamily) -> impl Iterator<Item = (&Metric, String)> {
    family
        .get_metric()
        .iter()
        .map(|metric| (metric, label(metric, "entity").to_string()))
}
