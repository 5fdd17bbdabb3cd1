//! Token bucket rate limiting and per-client state management.

mod bucket;
mod janitor;
mod policy;
mod registry;

pub use bucket::TokenBucket;
pub(crate) use janitor::validate_schedule;
pub use janitor::{Janitor, JanitorHandle, DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL};
pub use policy::{Policy, DEFAULT_BURST_SIZE, DEFAULT_REQUESTS_PER_SECOND};
pub use registry::{ClientEntry, ClientRegistry};
