//! In-flight request de-duplication (single-flight)
//!
//! The first caller for a key becomes the creator of a ticket and its
//! compute future is spawned onto the runtime. Later callers for the same
//! key subscribe to that ticket and receive a clone of the same outcome,
//! success or failure. The ticket is removed as soon as the compute
//! settles, so the next caller after that starts a fresh one.
//!
//! The compute runs in its own task. A waiter that gives up (deadline or
//! drop) leaves the compute running for the others, and it still runs to
//! completion when every waiter has left.

use crate::cache::CacheKey;
use crate::error::{QueryError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

/// One in-progress computation
struct Ticket<T: Clone> {
    id: u64,
    outcome: SharedOutcome<T>,
    subscribers: Arc<AtomicUsize>,
}

/// Removes a ticket when its compute task finishes, panics included
struct TicketRelease<T: Clone> {
    tickets: Arc<DashMap<CacheKey, Ticket<T>>>,
    key: CacheKey,
    id: u64,
}

impl<T: Clone> Drop for TicketRelease<T> {
    fn drop(&mut self) {
        // Only remove our own ticket, never a newer one for the same key
        self.tickets.remove_if(&self.key, |_, ticket| ticket.id == self.id);
        debug!("Released in-flight ticket {} for {}", self.id, self.key);
    }
}

/// How a caller joined a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the ticket; its compute function is the one running
    Creator,
    /// Joined an existing ticket
    Subscriber,
}

/// A caller's handle on a shared computation
///
/// Dropping the handle unsubscribes without affecting the computation.
pub struct Flight<T: Clone> {
    key: CacheKey,
    role: Role,
    outcome: SharedOutcome<T>,
    subscribers: Arc<AtomicUsize>,
}

impl<T: Clone> Flight<T> {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_creator(&self) -> bool {
        self.role == Role::Creator
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the shared outcome
    pub async fn wait(self) -> Result<T> {
        self.outcome.clone().await
    }

    /// Wait for the shared outcome, giving up at `deadline`
    ///
    /// `started` is when the caller's request began; a timeout reports
    /// the time waited since then.
    pub async fn wait_until(self, started: Instant, deadline: Instant) -> Result<T> {
        match tokio::time::timeout_at(deadline, self.outcome.clone()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!("Abandoned wait on in-flight query: {}", self.key);
                Err(QueryError::Timeout {
                    waited: started.elapsed(),
                    context: format!("waiting on in-flight query {}", self.key),
                })
            }
        }
    }
}

impl<T: Clone> Drop for Flight<T> {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Registry of computations currently in progress, keyed like the cache
pub struct InFlightRegistry<T: Clone> {
    tickets: Arc<DashMap<CacheKey, Ticket<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            tickets: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Join the ticket for `key`, or create it and spawn `compute`
    ///
    /// Ticket creation happens under the map's shard lock, so exactly one
    /// caller per key becomes the creator. `compute` is only called by
    /// the creator. Must be called from within a tokio runtime.
    pub fn join<F, Fut>(&self, key: &str, compute: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.tickets.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                let ticket = occupied.get();
                ticket.subscribers.fetch_add(1, Ordering::AcqRel);
                debug!("Joined in-flight query: {}", key);

                Flight {
                    key: key.to_string(),
                    role: Role::Subscriber,
                    outcome: ticket.outcome.clone(),
                    subscribers: ticket.subscribers.clone(),
                }
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let release = TicketRelease {
                    tickets: self.tickets.clone(),
                    key: key.to_string(),
                    id,
                };
                let work = compute();

                let handle = tokio::spawn(async move {
                    let _release = release;
                    work.await
                });

                let outcome: SharedOutcome<T> = async move {
                    match handle.await {
                        Ok(outcome) => outcome,
                        Err(err) => Err(QueryError::Aborted(err.to_string())),
                    }
                }
                .boxed()
                .shared();

                let subscribers = Arc::new(AtomicUsize::new(1));
                vacant.insert(Ticket {
                    id,
                    outcome: outcome.clone(),
                    subscribers: subscribers.clone(),
                });
                debug!("Started in-flight query {}: {}", id, key);

                Flight {
                    key: key.to_string(),
                    role: Role::Creator,
                    outcome,
                    subscribers,
                }
            }
        }
    }

    /// Join or start the computation for `key` and wait for its outcome
    pub async fn join_or_start<F, Fut>(&self, key: &str, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.join(key, compute).wait().await
    }

    /// Number of computations currently in progress
    pub fn in_flight(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.tickets.contains_key(key)
    }

    /// Callers currently waiting on `key`, zero when nothing is in flight
    pub fn subscribers(&self, key: &str) -> usize {
        self.tickets
            .get(key)
            .map_or(0, |ticket| ticket.subscribers.load(Ordering::Acquire))
    }
}
