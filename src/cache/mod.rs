//! # Response Cache
//!
//! Bounded, in-memory cache for generated answers.
//!
//! ## Features
//!
//! - **Per-class TTL**: realtime answers live about an hour, historical ones a day
//! - **Lazy expiry**: expired entries are dropped when read, no sweeper task
//! - **LRU Eviction**: the least recently read or written entry makes room
//! - **Hit tracking**: hit, miss and eviction counters for the metrics layer
//! - **Normalized keys**: equivalent phrasings of a question share an entry
//!
//! ## Example
//!
//! ```rust
//! use finrag_serve::cache::{CacheConfig, CacheKeyBuilder, ResponseCache, TtlClass};
//!
//! # async fn example() {
//! let cache = ResponseCache::new(CacheConfig::builder().max_entries(10_000).build());
//!
//! let key = CacheKeyBuilder::new("apple").query("Q3 revenue").build();
//! cache.put(key.clone(), "cached answer".to_string(), TtlClass::Realtime).await;
//!
//! if let Some(entry) = cache.get(&key).await {
//!     println!("Cache hit: {}", entry.value);
//! }
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod key;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::CacheEntry;
pub use key::{normalize_query, CacheKeyBuilder};
pub use store::ResponseCache;
pub use types::{CacheKey, CacheStats, CacheValue, TtlClass};
