//! Background eviction of idle clients.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ClientRegistry;
use crate::error::{Result, TurnstileError};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default idle time after which a client is forgotten.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(180);

/// Periodically evicts clients that have gone quiet.
#[derive(Debug, Clone)]
pub struct Janitor {
    registry: Arc<ClientRegistry>,
    sweep_interval: Duration,
    idle_threshold: Duration,
}

impl Janitor {
    /// Create a janitor for the given registry.
    ///
    /// The idle threshold must be a whole multiple (at least one) of the sweep interval.
    pub fn new(
        registry: Arc<ClientRegistry>,
        sweep_interval: Duration,
        idle_threshold: Duration,
    ) -> Result<Self> {
        validate_schedule(sweep_interval, idle_threshold)?;
        Ok(Self {
            registry,
            sweep_interval,
            idle_threshold,
        })
    }

    /// Create a janitor with the default one minute sweep and three minute threshold.
    pub fn with_defaults(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }

    /// Get the sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Get the idle threshold.
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Run one sweep as of `now`, returning how many clients were evicted.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let removed = self.registry.evict(self.idle_threshold, now);
        debug!(
            removed = removed,
            tracked = self.registry.size(),
            "Janitor sweep complete"
        );
        removed
    }

    /// Start sweeping on a timer until `shutdown` is cancelled.
    ///
    /// Must be called from within a tokio runtime. A sweep that has started
    /// always runs to completion; cancellation only prevents the next one.
    pub fn spawn(self, shutdown: CancellationToken) -> JanitorHandle {
        let token = shutdown.clone();
        let task = tokio::spawn(async move {
            info!(
                sweep_interval_secs = self.sweep_interval.as_secs_f64(),
                idle_threshold_secs = self.idle_threshold.as_secs_f64(),
                "Janitor started"
            );

            let mut interval = tokio::time::interval(self.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be idle yet
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.sweep();
                    }
                    _ = token.cancelled() => {
                        info!("Janitor shutting down");
                        break;
                    }
                }
            }
        });

        JanitorHandle { shutdown, task }
    }
}

/// Owner handle for a running janitor task.
#[derive(Debug)]
pub struct JanitorHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Whether the janitor task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop future sweeps and wait for the task to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Janitor task ended abnormally");
        }
    }
}

pub(crate) fn validate_schedule(sweep_interval: Duration, idle_threshold: Duration) -> Result<()> {
    if sweep_interval.is_zero() {
        return Err(TurnstileError::Config(
            "sweep interval must be greater than zero".to_string(),
        ));
    }
    if idle_threshold < sweep_interval {
        return Err(TurnstileError::Config(format!(
            "idle threshold ({:?}) must be at least one sweep interval ({:?})",
            idle_threshold, sweep_interval
        )));
    }
    if idle_threshold.as_nanos() % sweep_interval.as_nanos() != 0 {
        return Err(TurnstileError::Config(format!(
            "idle threshold ({:?}) must be a whole multiple of the sweep interval ({:?})",
            idle_threshold, sweep_interval
        )));
    }
    Ok(())
}
