//! Token bucket implementation.

use std::time::Instant;
use tracing::error;

use super::policy::Policy;

/// A token bucket tracking the admission budget of a single client.
///
/// Refill is computed lazily from the time elapsed since the last decision,
/// so idle buckets cost nothing. The bucket is not synchronized; callers
/// serialize access to it (the registry does so through its shard locks).
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum tokens the bucket can hold
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    /// Tokens currently available
    tokens: f64,
    /// When tokens were last refilled
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    pub fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity: capacity as f64,
            refill_rate,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    /// Create a full bucket parameterized from a policy.
    pub fn from_policy(policy: &Policy, now: Instant) -> Self {
        Self::new_at(policy.burst_size(), policy.requests_per_second(), now)
    }

    /// Try to take one token now.
    ///
    /// Returns `true` if the request may proceed.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Try to take one token at the given instant.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens available at the given instant, without consuming any.
    pub fn available_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity)
    }

    /// Tokens available as of the last decision.
    pub fn available(&self) -> f64 {
        self.tokens
    }

    /// Get the burst capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        if self.tokens > self.capacity || self.tokens < 0.0 {
            error!(
                tokens = self.tokens,
                capacity = self.capacity,
                "Token bucket in impossible state, clamping"
            );
            self.tokens = self.tokens.clamp(0.0, self.capacity);
        }

        // Callers may race to the lock with slightly out-of-order instants;
        // the refill clock only moves forward.
        if now <= self.last_refill {
            return;
        }

        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    #[cfg(test)]
    pub(crate) fn force_tokens(&mut self, tokens: f64) {
        self.tokens = tokens;
    }
}
