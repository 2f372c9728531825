//! Per-address rate limiting
//!
//! Token bucket per address, one independent limiter per request class. Reads get a tolerant
//! class (they are idempotent), writes a strict one (they move value). Buckets live in an
//! [`IdleTable`](crate::idle) and disappear after the idle TTL.

use crate::{config::RateClassConfig, context::CallContext, idle::IdleTable, types::Address};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket rate limiter
#[derive(Debug)]
struct TokenBucket {
    /// Current token count; negative while reservations are outstanding
    tokens: f64,

    /// Maximum tokens (burst size)
    capacity: f64,

    /// Token refill rate (per second)
    refill_rate: f64,

    /// Last refill timestamp
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Reserve one token and return when it may be used
    ///
    /// Nothing is reserved if that instant would be past `deadline`.
    fn reserve(&mut self, now: Instant, deadline: Option<Instant>) -> Option<Instant> {
        self.refill(now);

        let ready_at = if self.tokens >= 1.0 {
            now
        } else {
            let deficit = 1.0 - self.tokens;
            now + Duration::from_secs_f64(deficit / self.refill_rate)
        };

        if deadline.map_or(false, |deadline| ready_at > deadline) {
            return None;
        }

        self.tokens -= 1.0;
        Some(ready_at)
    }

    /// Give back a reservation that will not be used
    fn release(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

/// Address-keyed token bucket limiter for one request class
pub struct AddressRateLimiter {
    class: &'static str,
    config: RateClassConfig,
    table: IdleTable<Mutex<TokenBucket>>,
}

impl std::fmt::Debug for AddressRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressRateLimiter")
            .field("class", &self.class)
            .field("config", &self.config)
            .field("entries", &self.table.len())
            .finish()
    }
}

impl AddressRateLimiter {
    /// Create a limiter; `class` names it in logs and metrics
    pub fn new(class: &'static str, config: RateClassConfig, idle_ttl: Duration) -> Self {
        Self {
            class,
            config,
            table: IdleTable::new(idle_ttl),
        }
    }

    /// Request class this limiter guards
    pub fn class(&self) -> &'static str {
        self.class
    }

    /// Block until `address` may proceed, consuming one token
    ///
    /// Fails fast with [`Error::RateLimited`] when no token can be available before the
    /// context's deadline, and with [`Error::Cancelled`] when the context ends while waiting.
    /// Neither failure consumes a token.
    pub async fn wait(&self, address: Address, ctx: &CallContext) -> Result<()> {
        if ctx.is_done() {
            return Err(Error::Cancelled);
        }

        let bucket = self.table.touch(address, || {
            Mutex::new(TokenBucket::new(
                self.config.burst as f64,
                self.config.refill_per_sec,
            ))
        });

        let now = Instant::now();
        let reserved = bucket.lock().reserve(now, ctx.deadline());
        let Some(ready_at) = reserved else {
            tracing::debug!(class = self.class, address = %address, "Rate limit exceeded");
            return Err(Error::RateLimited);
        };

        if ready_at <= now {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = ctx.done() => {
                bucket.lock().release(Instant::now());
                Err(Error::Cancelled)
            }
            _ = tokio::time::sleep_until(ready_at) => Ok(()),
        }
    }

    /// Live buckets
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// No live buckets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `address` currently has a bucket
    pub fn contains(&self, address: &Address) -> bool {
        self.table.contains(address)
    }
}
