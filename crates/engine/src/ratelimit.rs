//! Per-provider token buckets.
//!
//! A provider with `rate_limit_rps = N` gets a bucket of capacity `N` refilled
//! at `N` tokens per second. Filtering only peeks; the provider actually
//! chosen consumes a token right before dispatch.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use switchyard_common::{Clock, ProviderId, ProviderInstance};

#[derive(Debug)]
struct Bucket {
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rps: u32, now: Instant) -> Self {
        Self {
            rate: f64::from(rps),
            tokens: f64::from(rps),
            last_refill: now,
        }
    }

    fn refill(&mut self, rps: u32, now: Instant) {
        let rate = f64::from(rps);
        if rate != self.rate {
            // Limit changed through an upsert
            self.rate = rate;
            self.tokens = self.tokens.min(rate);
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.last_refill = now;
    }
}

pub struct RateLimiter {
    buckets: DashMap<ProviderId, Mutex<Bucket>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Whether a token is available, without consuming it.
    pub fn peek(&self, instance: &ProviderInstance) -> bool {
        self.with_bucket(instance, |bucket| bucket.tokens >= 1.0)
    }

    /// Consume a token if one is available.
    pub fn try_acquire(&self, instance: &ProviderInstance) -> bool {
        let acquired = self.with_bucket(instance, |bucket| {
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                true
            } else {
                false
            }
        });
        if !acquired {
            trace!(provider = %instance.id, "Rate limit exhausted");
        }
        acquired
    }

    pub fn forget(&self, id: &ProviderId) {
        self.buckets.remove(id);
    }

    fn with_bucket(&self, instance: &ProviderInstance, f: impl FnOnce(&mut Bucket) -> bool) -> bool {
        let Some(rps) = instance.rate_limit_rps else {
            return true;
        };
        let now = self.clock.now();
        let entry = self
            .buckets
            .entry(instance.id.clone())
            .or_insert_with(|| Mutex::new(Bucket::new(rps, now)));
        let mut bucket = entry.value().lock();
        bucket.refill(rps, now);
        f(&mut *bucket)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
