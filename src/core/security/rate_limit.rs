//! Sliding-window request throttling keyed by client identity.
//!
//! Each client owns an ordered list of the instants at which its requests
//! were admitted. On every check the entries that fell out of the trailing
//! window are dropped; the request is admitted only while fewer than
//! `max_requests` remain. Rejected requests are never recorded.
//!
//! State lives behind the [`RateStore`] trait so deployments running several
//! instances can plug in a shared backend. The default
//! [`ShardedMemoryStore`] stripes clients over a fixed set of mutexes.

use std::collections::hash_map::RandomState;
use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::core::config::RateLimitConfig;

/// Number of lock stripes in the default in-memory store.
const DEFAULT_SHARDS: usize = 16;

/// Rejection returned when a client exhausted its window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {client}; retry in {}s", .retry_after.as_secs())]
    TooManyRequests {
        client: String,
        retry_after: Duration,
    },
}

impl RateLimitError {
    /// How long the client should wait before the oldest entry expires.
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::TooManyRequests { retry_after, .. } => *retry_after,
        }
    }
}

/// Outcome of a single admission attempt against a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was recorded; `remaining` more fit in the window.
    Admitted { remaining: usize },
    /// The window is full; nothing was recorded.
    Rejected { retry_after: Duration },
}

/// Backing storage for per-client request windows.
///
/// `admit` must prune, count, and record as one atomic step for the given
/// key.
pub trait RateStore: Send + Sync {
    /// Try to record a request for `client` at `now`.
    fn admit(&self, client: &str, now: Instant, window: Duration, max: usize) -> Admission;

    /// Drop clients with no requests left inside the window. Returns how
    /// many were removed.
    fn sweep(&self, now: Instant, window: Duration) -> usize;

    /// Number of clients currently tracked.
    fn tracked_clients(&self) -> usize;
}

type Windows = HashMap<String, VecDeque<Instant>>;

/// In-process store with striped locking.
///
/// A client always maps to the same shard, so contention is limited to
/// clients that happen to share a stripe.
pub struct ShardedMemoryStore {
    shards: Box<[Mutex<Windows>]>,
    hasher: RandomState,
}

impl ShardedMemoryStore {
    /// Create a store with the given number of stripes (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, client: &str) -> MutexGuard<'_, Windows> {
        let index = (self.hasher.hash_one(client) as usize) % self.shards.len();
        lock(&self.shards[index])
    }
}

impl Default for ShardedMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

fn lock(shard: &Mutex<Windows>) -> MutexGuard<'_, Windows> {
    // Windows are always left consistent, so a poisoned lock is still usable.
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

impl RateStore for ShardedMemoryStore {
    fn admit(&self, client: &str, now: Instant, window: Duration, max: usize) -> Admission {
        let mut shard = self.shard(client);
        let timestamps = shard.entry(client.to_string()).or_default();

        prune(timestamps, now, window);

        if timestamps.len() >= max {
            let retry_after = timestamps
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            return Admission::Rejected { retry_after };
        }

        timestamps.push_back(now);
        Admission::Admitted {
            remaining: max - timestamps.len(),
        }
    }

    fn sweep(&self, now: Instant, window: Duration) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = lock(shard);
            let before = shard.len();
            shard.retain(|_, timestamps| {
                prune(timestamps, now, window);
                !timestamps.is_empty()
            });
            removed += before - shard.len();
        }
        removed
    }

    fn tracked_clients(&self) -> usize {
        self.shards.iter().map(|shard| lock(shard).len()).sum()
    }
}

/// Per-client sliding-window rate limiter.
///
/// Built once at service start and shared by every request handler.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateStore>,
}

impl RateLimiter {
    /// Create a limiter backed by the default in-memory store.
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(ShardedMemoryStore::default()))
    }

    /// Create a limiter backed by a custom store.
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn RateStore>) -> Self {
        Self { config, store }
    }

    /// Get the limiter configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request from `client` at `now`.
    pub fn check(&self, client: &str, now: Instant) -> Result<(), RateLimitError> {
        if !self.config.enabled {
            return Ok(());
        }

        match self
            .store
            .admit(client, now, self.config.window(), self.config.max_requests)
        {
            Admission::Admitted { remaining } => {
                debug!(client, remaining, "Request admitted");
                Ok(())
            }
            Admission::Rejected { retry_after } => {
                warn!(client, "Rate limit exceeded");
                Err(RateLimitError::TooManyRequests {
                    client: client.to_string(),
                    retry_after,
                })
            }
        }
    }

    /// Forget clients whose windows have fully expired.
    pub fn sweep(&self, now: Instant) -> usize {
        let removed = self.store.sweep(now, self.config.window());
        if removed > 0 {
            debug!(removed, "Evicted idle rate-limit windows");
        }
        removed
    }

    /// Number of clients currently tracked by the store.
    pub fn tracked_clients(&self) -> usize {
        self.store.tracked_clients()
    }
}
