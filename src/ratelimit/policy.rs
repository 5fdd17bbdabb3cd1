//! Process-wide admission policy.

use crate::error::{Result, TurnstileError};

/// Default sustained rate, in requests per second.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;
/// Default burst size.
pub const DEFAULT_BURST_SIZE: u32 = 4;

/// The limits every client bucket is created with.
///
/// Built once at startup and shared read-only with the registry and gate.
/// Every constructor yields a validated rate and burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    /// Tokens added to a bucket per second
    requests_per_second: f64,
    /// Maximum tokens a bucket may hold
    burst_size: u32,
    /// When false every request is admitted
    enabled: bool,
}

impl Policy {
    /// Create an enabled policy, rejecting values that cannot drive a bucket.
    pub fn new(requests_per_second: f64, burst_size: u32) -> Result<Self> {
        let policy = Self {
            requests_per_second,
            burst_size,
            enabled: true,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Return this policy with the enabled toggle set.
    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    /// Get the sustained rate in tokens per second.
    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    /// Get the burst size.
    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    /// Whether rate limiting is applied.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(TurnstileError::Config(format!(
                "requests_per_second must be a positive number, got {}",
                self.requests_per_second
            )));
        }
        if self.burst_size == 0 {
            return Err(TurnstileError::Config(
                "burst_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst_size: DEFAULT_BURST_SIZE,
            enabled: true,
        }
    }
}
