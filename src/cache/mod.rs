//! Expiry-ordered resolution cache.
//!
//! [`DnsCache`] is the handle the connection layer holds: one per process,
//! constructed at startup and shared by reference. It looks answers up by a
//! linear scan of the pool (the pool is ordered by expiry, not by domain),
//! falls back to the resolver on a miss and inserts the fresh answer with a
//! fixed TTL. Expired answers are removed by the manager's eviction task.

mod manager;
mod pool;

pub use manager::{CacheManager, LoopState};
pub use pool::{CacheEntry, CachePool};

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DnsConfig;
use crate::error::{CacheError, ResolveError};
use crate::policy::DnsPolicy;
use crate::resolver::{Answer, Resolve};
use crate::stats::{CacheStats, StatsSnapshot};

pub struct DnsCache<R> {
    manager: CacheManager<Answer>,
    resolver: R,
    ttl: Duration,
    policy: DnsPolicy,
    stats: CacheStats,
}

impl<R: Resolve> DnsCache<R> {
    pub fn new(resolver: R, config: &DnsConfig) -> Self {
        Self {
            manager: CacheManager::new(),
            resolver,
            ttl: config.cache_ttl,
            policy: config.policy.clone(),
            stats: CacheStats::new(),
        }
    }

    /// Start background eviction. Must be called from within a tokio runtime.
    pub fn run(&self) -> Result<(), CacheError> {
        self.manager.run()
    }

    pub fn stop(&self) {
        self.manager.stop();
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    /// Resolve `domain`, serving from the cache when possible.
    ///
    /// A hit is returned as-is; staleness is the eviction task's concern.
    /// On a miss the resolver is called once and a successful answer is
    /// cached for the configured TTL. Failures are returned and nothing is
    /// cached. Domains the policy marks for remote resolution skip the cache
    /// in both directions.
    pub fn resolve_with_cache(&self, domain: &str) -> Result<Answer, ResolveError> {
        if self.policy.remote_resolve(domain) {
            self.stats.record_bypass();
            debug!(domain, "remote resolve, bypassing cache");
            return self.resolve_uncached(domain);
        }

        if let Some(answer) = self.lookup(domain) {
            self.stats.record_hit();
            return Ok(answer);
        }

        self.stats.record_miss();
        let answer = self.resolve_uncached(domain)?;
        self.manager.push(answer.clone(), self.ttl);
        debug!(domain, ttl_secs = self.ttl.as_secs(), "cached answer");
        Ok(answer)
    }

    /// Cached answer for `domain`, without consulting the resolver.
    pub fn lookup(&self, domain: &str) -> Option<Answer> {
        self.manager.range(|answer| answer.matches(domain))
    }

    /// Insert an answer produced elsewhere.
    pub fn push(&self, answer: Answer, ttl: Duration) {
        self.manager.push(answer, ttl);
    }

    pub fn clear(&self) {
        self.manager.clear();
    }

    pub fn len(&self) -> usize {
        self.manager.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manager.is_empty()
    }

    pub fn policy(&self) -> &DnsPolicy {
        &self.policy
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset(self.manager.take_evicted())
    }

    fn resolve_uncached(&self, domain: &str) -> Result<Answer, ResolveError> {
        self.resolver.resolve(domain).inspect_err(|e| {
            self.stats.record_failure();
            warn!(domain, error = %e, "resolution failed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DnsRule;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MS: Duration = Duration::from_millis(1);
    const CACHE_TEST_TTL: Duration = Duration::from_secs(600);

    struct CountingResolver {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, domain: &str) -> Result<Answer, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ResolveError::Other(format!("no route to {domain}")));
            }
            Ok(Answer::new(domain, vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]))
        }
    }

    fn cache_with(ttl: Duration, fail: bool) -> (DnsCache<CountingResolver>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CountingResolver {
            calls: Arc::clone(&calls),
            fail,
        };
        let config = DnsConfig {
            cache_ttl: ttl,
            ..DnsConfig::default()
        };
        (DnsCache::new(resolver, &config), calls)
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_scenario_hits_then_resolves_again() {
        let (cache, calls) = cache_with(CACHE_TEST_TTL, false);
        cache.run().unwrap();
        cache.push(
            Answer::new("a.com", vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]),
            MS * 50,
        );

        tokio::time::sleep(MS * 10).await;
        let answer = cache.resolve_with_cache("a.com").unwrap();
        assert_eq!(answer.addresses, vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(MS * 50).await;
        cache.resolve_with_cache("a.com").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn miss_calls_resolver_once_and_inserts() {
        let (cache, calls) = cache_with(CACHE_TEST_TTL, false);
        cache.run().unwrap();

        cache.resolve_with_cache("b.com").unwrap();
        cache.resolve_with_cache("b.com").unwrap();
        cache.resolve_with_cache("B.COM").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        let stats = cache.stats_snapshot_and_reset();
        assert_eq!((stats.hits, stats.misses), (2, 1));
    }

    #[tokio::test]
    async fn each_distinct_miss_resolves() {
        let (cache, calls) = cache_with(CACHE_TEST_TTL, false);

        for domain in ["a.com", "b.com", "c.com"] {
            cache.resolve_with_cache(domain).unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup("b.com").is_some());
    }

    #[tokio::test]
    async fn failure_propagates_and_caches_nothing() {
        let (cache, calls) = cache_with(CACHE_TEST_TTL, true);

        assert!(cache.resolve_with_cache("down.com").is_err());
        assert!(cache.resolve_with_cache("down.com").is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats_snapshot_and_reset().failures, 2);
    }

    #[tokio::test]
    async fn remote_resolve_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = DnsConfig {
            cache_ttl: CACHE_TEST_TTL,
            policy: DnsPolicy::new(vec![], vec![DnsRule::new("*google.com", true)]),
        };
        let cache = DnsCache::new(
            CountingResolver {
                calls: Arc::clone(&calls),
                fail: false,
            },
            &config,
        );

        cache.resolve_with_cache("www.google.com").unwrap();
        cache.resolve_with_cache("www.google.com").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats_snapshot_and_reset().bypassed, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_each_insert_once() {
        let (cache, calls) = cache_with(CACHE_TEST_TTL, false);
        let cache = Arc::new(cache);
        cache.run().unwrap();

        let lookups = (0..32).map(|i| {
            let cache = Arc::clone(&cache);
            tokio::task::spawn_blocking(move || {
                let domain = if i % 2 == 0 {
                    "shared.com".to_string()
                } else {
                    format!("host{i}.com")
                };
                cache.resolve_with_cache(&domain)
            })
        });
        for lookup in futures::future::join_all(lookups).await {
            lookup.unwrap().unwrap();
        }

        let stats = cache.stats_snapshot_and_reset();
        assert_eq!(calls.load(Ordering::SeqCst), cache.len());
        assert_eq!(stats.misses as usize, cache.len());
        assert_eq!(stats.hits + stats.misses, 32);
        assert!(cache.lookup("shared.com").is_some());
        assert!(cache.manager.is_consistent());
    }

    #[tokio::test]
    async fn clear_forces_fresh_resolution() {
        let (cache, calls) = cache_with(CACHE_TEST_TTL, false);
        cache.resolve_with_cache("a.com").unwrap();

        cache.clear();
        cache.resolve_with_cache("a.com").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
