//! Deterministic cache keys for financial queries

use crate::cache::types::CacheKey;
use urlencoding::encode;

/// Namespace prefix for every response key
pub const KEY_PREFIX: &str = "financial_rag";

/// Lower-case, trim, and collapse inner whitespace so trivially different
/// phrasings of the same question share an entry.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key builder for (entity, query, parameters)
///
/// Parameters are sorted by name before being appended, so the same set
/// of parameters yields the same key in any insertion order.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    entity: String,
    query: String,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder for a subject entity
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    /// Set the query text
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Add a parameter to the key
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Add several parameters at once
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Build the cache key
    ///
    /// Every field is percent-encoded before it is joined, so `:`, `?`,
    /// `&` and `=` only ever appear as separators and distinct inputs
    /// never share a key.
    pub fn build(mut self) -> CacheKey {
        let entity = self.entity.trim().to_lowercase();
        let query = normalize_query(&self.query);
        let mut key = format!(
            "{}:{}:{}",
            KEY_PREFIX,
            encode(&entity),
            encode(&query)
        );

        if !self.params.is_empty() {
            self.params.sort();
            let params_str: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
                .collect();
            key.push('?');
            key.push_str(&params_str.join("&"));
        }

        key
    }
}
