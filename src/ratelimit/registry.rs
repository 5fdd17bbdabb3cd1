//! Per-client registry of token buckets.

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::policy::Policy;

/// Throttling state for one client.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    /// The client's bucket
    pub limiter: TokenBucket,
    /// Most recent request attributed to this client
    pub last_seen: Instant,
}

impl ClientEntry {
    fn new(policy: &Policy, now: Instant) -> Self {
        Self {
            limiter: TokenBucket::from_policy(policy, now),
            last_seen: now,
        }
    }

    /// How long this client has been idle as of `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// In-memory map from client identifier to [`ClientEntry`].
///
/// Locking discipline: the map is sharded by identifier hash and each shard
/// has its own lock. Lookup-or-insert, the bucket decision, and eviction of a
/// given identifier all run under that identifier's shard lock, so they are
/// mutually exclusive while unrelated clients on other shards proceed in
/// parallel. Nothing here blocks on I/O.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<String, ClientEntry>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Get the entry for `identifier`, creating it from `policy` if absent.
    ///
    /// Marks the client as seen at `now`; `last_seen` never moves backwards. The returned guard holds the shard
    /// lock; drop it before calling back into the registry.
    pub fn get_or_create(
        &self,
        identifier: &str,
        policy: &Policy,
        now: Instant,
    ) -> RefMut<'_, String, ClientEntry> {
        if let Some(mut entry) = self.clients.get_mut(identifier) {
            entry.last_seen = entry.last_seen.max(now);
            return entry;
        }

        // Another caller may have inserted between the lookup above and here;
        // the entry API settles it under the shard lock.
        self.clients
            .entry(identifier.to_owned())
            .and_modify(|entry| entry.last_seen = entry.last_seen.max(now))
            .or_insert_with(|| {
                debug!(
                    client = %identifier,
                    burst = policy.burst_size(),
                    rate = policy.requests_per_second(),
                    "Creating new client bucket"
                );
                ClientEntry::new(policy, now)
            })
    }

    /// Record a request from `identifier` and decide whether it may proceed.
    pub fn check(&self, identifier: &str, policy: &Policy, now: Instant) -> bool {
        let mut entry = self.get_or_create(identifier, policy, now);
        let allowed = entry.limiter.allow_at(now);

        trace!(
            client = %identifier,
            allowed = allowed,
            available = entry.limiter.available(),
            "Checked client bucket"
        );

        allowed
    }

    /// Remove every entry idle for longer than `older_than` as of `now`.
    ///
    /// Returns the number of entries removed.
    pub fn evict(&self, older_than: Duration, now: Instant) -> usize {
        let mut removed = 0;
        self.clients.retain(|_, entry| {
            let keep = entry.idle_for(now) <= older_than;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.clients.len(),
                "Evicted idle clients"
            );
        }

        removed
    }

    /// Get the number of tracked clients.
    pub fn size(&self) -> usize {
        self.clients.len()
    }

    /// Whether a client is currently tracked.
    pub fn contains(&self, identifier: &str) -> bool {
        self.clients.contains_key(identifier)
    }

    /// Tokens a client would have at `now`, without consuming or touching it.
    ///
    /// Returns `None` if the client is not tracked.
    pub fn available_tokens(&self, identifier: &str, now: Instant) -> Option<f64> {
        self.clients
            .get(identifier)
            .map(|entry| entry.limiter.available_at(now))
    }

    /// When a client was last seen.
    pub fn last_seen(&self, identifier: &str) -> Option<Instant> {
        self.clients.get(identifier).map(|entry| entry.last_seen)
    }

    /// Drop all tracked clients.
    pub fn clear(&self) {
        self.clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_registry_creation() {
        let registry = ClientRegistry::new();
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_get_or_create_creates_once() {
        let registry = ClientRegistry::new();
        let policy = Policy::default();
        let t0 = Instant::now();

        drop(registry.get_or_create("10.0.0.1", &policy, t0));
        drop(registry.get_or_create("10.0.0.1", &policy, t0));

        assert_eq!(registry.size(), 1);
        assert!(registry.contains("10.0.0.1"));
    }

    #[test]
    fn test_get_or_create_updates_last_seen() {
        let registry = ClientRegistry::new();
        let policy = Policy::default();
        let t0 = Instant::now();
        let t1 = t0 + secs(30);

        drop(registry.get_or_create("a", &policy, t0));
        assert_eq!(registry.last_seen("a"), Some(t0));

        drop(registry.get_or_create("a", &policy, t1));
        assert_eq!(registry.last_seen("a"), Some(t1));
    }

    #[test]
    fn test_last_seen_ignores_out_of_order_instant() {
        let registry = ClientRegistry::new();
        let policy = Policy::default();
        let t0 = Instant::now();
        let later = t0 + secs(100);

        registry.check("a", &policy, later);
        registry.check("a", &policy, t0);
        assert_eq!(registry.last_seen("a"), Some(later));

        drop(registry.get_or_create("a", &policy, t0 + secs(50)));
        assert_eq!(registry.last_seen("a"), Some(later));

        // Still idle-timed from the newest request
        assert_eq!(registry.evict(secs(180), t0 + secs(200)), 0);
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_new_entry_uses_policy() {
        let registry = ClientRegistry::new();
        let policy = Policy::new(5.0, 10).unwrap();
        let entry = registry.get_or_create("a", &policy, Instant::now());

        assert_eq!(entry.limiter.capacity(), 10);
        assert_eq!(entry.limiter.refill_rate(), 5.0);
    }

    #[test]
    fn test_clients_have_separate_buckets() {
        let registry = ClientRegistry::new();
        let policy = Policy::new(1.0, 2).unwrap();
        let t0 = Instant::now();

        assert!(registry.check("a", &policy, t0));
        assert!(registry.check("a", &policy, t0));
        assert!(!registry.check("a", &policy, t0));

        assert!(registry.check("b", &policy, t0));
        assert_eq!(registry.available_tokens("a", t0), Some(0.0));
        assert_eq!(registry.available_tokens("b", t0), Some(1.0));
        assert_eq!(registry.available_tokens("c", t0), None);
    }

    #[test]
    fn test_evict_removes_idle_entries() {
        let registry = ClientRegistry::new();
        let policy = Policy::default();
        let t0 = Instant::now();

        registry.check("stale", &policy, t0);
        registry.check("fresh", &policy, t0 + secs(150));

        let removed = registry.evict(secs(180), t0 + secs(200));

        assert_eq!(removed, 1);
        assert!(!registry.contains("stale"));
        assert!(registry.contains("fresh"));
    }

    #[test]
    fn test_evict_keeps_entry_at_threshold() {
        let registry = ClientRegistry::new();
        let policy = Policy::default();
        let t0 = Instant::now();

        registry.check("a", &policy, t0);

        assert_eq!(registry.evict(secs(180), t0 + secs(180)), 0);
        assert_eq!(registry.evict(secs(180), t0 + secs(181)), 1);
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_evicted_client_starts_fresh() {
        let registry = ClientRegistry::new();
        let policy = Policy::new(0.001, 1).unwrap();
        let t0 = Instant::now();

        assert!(registry.check("a", &policy, t0));
        assert!(!registry.check("a", &policy, t0 + secs(1)));

        registry.evict(secs(60), t0 + secs(120));
        assert!(registry.check("a", &policy, t0 + secs(120)));
    }

    #[test]
    fn test_clear() {
        let registry = ClientRegistry::new();
        let policy = Policy::default();
        let t0 = Instant::now();

        registry.check("a", &policy, t0);
        registry.check("b", &policy, t0);
        assert_eq!(registry.size(), 2);

        registry.clear();
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_concurrent_first_requests_create_one_entry() {
        let registry = Arc::new(ClientRegistry::new());
        let policy = Policy::default();
        let barrier = Arc::new(Barrier::new(16));
        let t0 = Instant::now();

        std::thread::scope(|scope| {
            for _ in 0..16 {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    drop(registry.get_or_create("198.51.100.7", &policy, t0));
                });
            }
        });

        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_concurrent_checks_do_not_lose_updates() {
        let registry = Arc::new(ClientRegistry::new());
        let policy = Policy::new(1.0, 100).unwrap();
        let admitted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let t0 = Instant::now();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let registry = Arc::clone(&registry);
                let admitted = Arc::clone(&admitted);
                let barrier = Arc::clone(&barrier);
                scope.spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        if registry.check("shared", &policy, t0) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 100);
        assert_eq!(registry.available_tokens("shared", t0), Some(0.0));
    }

    #[test]
    fn test_concurrent_evict_and_check() {
        let registry = Arc::new(ClientRegistry::new());
        let policy = Policy::default();
        let t0 = Instant::now();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    for i in 0..500 {
                        let id = format!("client-{}-{}", worker, i % 20);
                        registry.check(&id, &policy, t0 + secs(i));
                    }
                });
            }

            let registry = Arc::clone(&registry);
            scope.spawn(move || {
                for i in 0..100 {
                    registry.evict(secs(10), t0 + secs(i * 5));
                }
            });
        });

        assert!(registry.size() <= 80);
    }
}
