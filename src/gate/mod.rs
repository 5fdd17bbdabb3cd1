//! The admission gate: the request-path entry point for rate limiting.

mod identity;

pub use identity::{ClientIdentity, RealIpResolver, UNKNOWN_CLIENT};

use axum::extract::Request;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::ratelimit::{ClientRegistry, Policy};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Forward the request downstream
    Proceed,
    /// Short-circuit with a throttling response
    Reject,
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_proceed(&self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

/// Decides per client whether a request may proceed.
///
/// The gate holds no per-request state of its own; all client state lives
/// in the shared [`ClientRegistry`].
pub struct AdmissionGate {
    /// Limits applied to every client
    policy: Policy,
    /// Per-client buckets
    registry: Arc<ClientRegistry>,
    /// Resolves the client key for a request
    identity: Arc<dyn ClientIdentity>,
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("policy", &self.policy)
            .field("tracked_clients", &self.registry.size())
            .finish()
    }
}

impl AdmissionGate {
    /// Create a gate that keys clients by their real IP address.
    pub fn new(policy: Policy, registry: Arc<ClientRegistry>) -> Self {
        Self::with_identity(policy, registry, Arc::new(RealIpResolver))
    }

    /// Create a gate with a custom client resolver.
    pub fn with_identity(
        policy: Policy,
        registry: Arc<ClientRegistry>,
        identity: Arc<dyn ClientIdentity>,
    ) -> Self {
        Self {
            policy,
            registry,
            identity,
        }
    }

    /// Decide whether `request` may proceed.
    pub fn admit(&self, request: &Request) -> Decision {
        if !self.policy.is_enabled() {
            return Decision::Proceed;
        }

        let client = self.identity.identify(request);
        self.admit_client(&client)
    }

    /// Decide whether a request from `client` may proceed now.
    pub fn admit_client(&self, client: &str) -> Decision {
        self.admit_client_at(client, Instant::now())
    }

    /// Decide whether a request from `client` may proceed at `now`.
    pub fn admit_client_at(&self, client: &str, now: Instant) -> Decision {
        if !self.policy.is_enabled() {
            return Decision::Proceed;
        }

        if self.registry.check(client, &self.policy, now) {
            Decision::Proceed
        } else {
            debug!(client = %client, "Rate limit exceeded");
            Decision::Reject
        }
    }

    /// Get the policy this gate enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Get the registry backing this gate.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Get the number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.registry.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use std::time::Duration;

    fn gate(policy: Policy) -> AdmissionGate {
        AdmissionGate::new(policy, Arc::new(ClientRegistry::new()))
    }

    struct FixedIdentity(&'static str);

    impl ClientIdentity for FixedIdentity {
        fn identify(&self, _request: &Request) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn test_burst_and_refill_scenario() {
        let gate = gate(Policy::new(2.0, 4).unwrap());
        let t0 = Instant::now();

        for _ in 0..4 {
            assert_eq!(gate.admit_client_at("A", t0), Decision::Proceed);
        }
        assert_eq!(gate.registry().available_tokens("A", t0), Some(0.0));
        assert_eq!(gate.admit_client_at("A", t0), Decision::Reject);

        let t1 = t0 + Duration::from_millis(500);
        assert_eq!(gate.admit_client_at("A", t1), Decision::Proceed);
        assert_eq!(gate.admit_client_at("A", t1), Decision::Reject);
    }

    #[test]
    fn test_disabled_gate_admits_everything() {
        let gate = gate(Policy::disabled());
        let t0 = Instant::now();

        for _ in 0..10_000 {
            assert_eq!(gate.admit_client_at("A", t0), Decision::Proceed);
        }
        assert_eq!(gate.tracked_clients(), 0);
    }

    #[test]
    fn test_disabled_gate_skips_identity() {
        struct PanickingIdentity;
        impl ClientIdentity for PanickingIdentity {
            fn identify(&self, _request: &Request) -> String {
                panic!("identity must not be consulted when disabled");
            }
        }

        let gate = AdmissionGate::with_identity(
            Policy::disabled(),
            Arc::new(ClientRegistry::new()),
            Arc::new(PanickingIdentity),
        );
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(gate.admit(&request), Decision::Proceed);
    }

    #[test]
    fn test_admit_uses_identity() {
        let gate = AdmissionGate::with_identity(
            Policy::new(1.0, 1).unwrap(),
            Arc::new(ClientRegistry::new()),
            Arc::new(FixedIdentity("tenant-7")),
        );

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(gate.admit(&request), Decision::Proceed);
        assert!(gate.registry().contains("tenant-7"));
        assert_eq!(gate.admit(&request), Decision::Reject);
    }

    #[test]
    fn test_clients_are_independent() {
        let gate = gate(Policy::new(1.0, 1).unwrap());
        let t0 = Instant::now();

        assert!(gate.admit_client_at("A", t0).is_proceed());
        assert!(!gate.admit_client_at("A", t0).is_proceed());
        assert!(gate.admit_client_at("B", t0).is_proceed());
        assert_eq!(gate.tracked_clients(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_share_one_bucket() {
        let gate = Arc::new(gate(Policy::new(0.001, 4).unwrap()));
        let t0 = Instant::now();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.admit_client_at("new-client", t0) })
            })
            .collect();

        let decisions = futures::future::join_all(tasks).await;
        let admitted = decisions
            .into_iter()
            .map(|d| d.unwrap())
            .filter(Decision::is_proceed)
            .count();

        assert_eq!(admitted, 4);
        assert_eq!(gate.tracked_clients(), 1);
    }
}
