//! Process-wide hostname resolution cache with TTL-based expiry.
//!
//! One [`ResolutionCache`] is shared by every connection handler. Lookups
//! that hit return immediately; misses go through the configured
//! [`Resolve`] implementation and schedule the new entry for removal after
//! the cache TTL.
//!
//! Check-then-insert is not atomic: two handlers missing on the same host at
//! the same time both resolve it and the last insert wins. Each individual
//! map operation is safe under concurrency.

mod eviction;

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::resolver::Resolve;
use eviction::EvictionQueue;

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that required a network resolution.
    pub misses: u64,
    /// Entries removed by the expiry sweeper.
    pub evictions: u64,
    /// Entries currently cached.
    pub entries: usize,
}

/// Concurrent hostname → address cache.
///
/// # Examples
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use std::time::Duration;
/// use fwdproxy::cache::ResolutionCache;
/// use fwdproxy::resolver::SystemResolver;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let cache = ResolutionCache::new(SystemResolver, Duration::from_secs(30));
/// let ip = cache.resolve("127.0.0.1").await?;
/// assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
/// assert_eq!(cache.get("127.0.0.1"), Some(ip));
/// # Ok(())
/// # }
/// ```
pub struct ResolutionCache<R> {
    entries: Arc<DashMap<String, IpAddr>>,
    resolver: R,
    ttl: Duration,
    expiries: EvictionQueue,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl<R: Resolve> ResolutionCache<R> {
    /// Creates an empty cache whose entries live for `ttl`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime: the expiry sweeper is
    /// spawned here.
    pub fn new(resolver: R, ttl: Duration) -> Self {
        let entries = Arc::new(DashMap::new());
        let evictions = Arc::new(AtomicU64::new(0));
        let expiries = EvictionQueue::spawn(Arc::clone(&entries), Arc::clone(&evictions));

        Self {
            entries,
            resolver,
            ttl,
            expiries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions,
        }
    }

    /// Returns the address for `host`, resolving and caching it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's error. Nothing is cached in that case.
    pub async fn resolve(&self, host: &str) -> io::Result<IpAddr> {
        if let Some(ip) = self.get(host) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(host = %host, address = %ip, "resolution cache hit");
            return Ok(ip);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let ip = self.resolver.resolve(host).await?;

        self.entries.insert(host.to_owned(), ip);
        self.expiries
            .schedule(host.to_owned(), Instant::now() + self.ttl);
        debug!(host = %host, address = %ip, "resolution cached");

        Ok(ip)
    }
}

impl<R> ResolutionCache<R> {
    /// Returns the cached address for `host` without resolving.
    pub fn get(&self, host: &str) -> Option<IpAddr> {
        self.entries.get(host).map(|entry| *entry.value())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the hit, miss and eviction counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
