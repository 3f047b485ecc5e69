//! Per-actor token-bucket admission control.
//!
//! Each actor (typically a client IP) gets its own bucket, created lazily on
//! first sight. A periodic sweep drops every bucket at once to bound memory;
//! this also resets the budget of well-behaved actors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Token-bucket parameters shared by every actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    /// One request every 12 seconds with a burst of 5.
    fn default() -> Self {
        Self {
            per_second: 1.0 / 12.0,
            burst: 5,
        }
    }
}

/// A single actor's bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.burst),
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last call, then take one token.
    fn try_take(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * config.per_second)
            .min(f64::from(config.burst));
        if now > self.last_refill {
            self.last_refill = now;
        }
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Concurrency-safe map of actor → token bucket.
#[derive(Debug)]
pub struct ActorRateLimiter {
    config: RateLimitConfig,
    actors: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl ActorRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            actors: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Try to admit one request from `actor` now.
    pub fn allow(&self, actor: &str) -> bool {
        self.allow_at(actor, Instant::now())
    }

    /// Try to admit one request from `actor` at the given instant.
    pub fn allow_at(&self, actor: &str, now: Instant) -> bool {
        let bucket = self.bucket(actor, now);
        let mut bucket = bucket.lock();
        bucket.try_take(&self.config, now)
    }

    /// Number of actors currently tracked.
    pub fn tracked(&self) -> usize {
        self.actors.read().len()
    }

    /// Drop every actor's bucket.
    pub fn reset(&self) {
        let cleared = std::mem::take(&mut *self.actors.write());
        debug!(actors = cleared.len(), "rate limiter cleanup executed");
    }

    /// Spawn a periodic task calling [`Self::reset`] every `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.reset();
            }
        })
    }

    /// Look up under the read lock; insert under the write lock only if absent.
    fn bucket(&self, actor: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.actors.read().get(actor) {
            return Arc::clone(bucket);
        }
        let mut actors = self.actors.write();
        Arc::clone(
            actors
                .entry(actor.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::full(&self.config, now)))),
        )
    }
}
