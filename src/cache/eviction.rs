//! Scheduled expiry for [`ResolutionCache`](super::ResolutionCache) entries.
//!
//! Every insertion schedules exactly one removal. Rather than parking one
//! task per entry, a single sweeper task per cache keeps the pending
//! removals in a min-heap ordered by deadline and sleeps until the earliest.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

type Pending = BinaryHeap<Reverse<(Instant, String)>>;

/// Handle used by the cache to schedule removals.
///
/// Dropping the last handle interrupts the sweeper, which then performs
/// every removal still pending before it exits.
#[derive(Debug)]
pub(crate) struct EvictionQueue {
    tx: mpsc::UnboundedSender<(Instant, String)>,
}

impl EvictionQueue {
    /// Spawns the sweeper for `entries` on the current Tokio runtime.
    pub(crate) fn spawn(entries: Arc<DashMap<String, IpAddr>>, evictions: Arc<AtomicU64>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(sweep(entries, evictions, rx));
        Self { tx }
    }

    /// Schedules `host` for removal at `deadline`.
    pub(crate) fn schedule(&self, host: String, deadline: Instant) {
        if self.tx.send((deadline, host)).is_err() {
            debug!("eviction sweeper is gone, entry will not expire");
        }
    }
}

async fn sweep(
    entries: Arc<DashMap<String, IpAddr>>,
    evictions: Arc<AtomicU64>,
    mut rx: mpsc::UnboundedReceiver<(Instant, String)>,
) {
    let mut pending: Pending = BinaryHeap::new();

    loop {
        let next = pending.peek().map(|Reverse((deadline, _))| *deadline);

        tokio::select! {
            scheduled = rx.recv() => match scheduled {
                Some(expiry) => pending.push(Reverse(expiry)),
                None => break,
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                expire_due(&entries, &evictions, &mut pending, Instant::now());
            }
        }
    }

    // Interrupted: the removals still happen.
    debug!(pending = pending.len(), "eviction sweeper interrupted, flushing");
    for Reverse((_, host)) in pending.drain() {
        remove(&entries, &evictions, &host);
    }
}

/// Pops and applies every removal whose deadline is at or before `now`.
fn expire_due(
    entries: &DashMap<String, IpAddr>,
    evictions: &AtomicU64,
    pending: &mut Pending,
    now: Instant,
) {
    while let Some(Reverse((deadline, _))) = pending.peek() {
        if *deadline > now {
            break;
        }
        if let Some(Reverse((_, host))) = pending.pop() {
            remove(entries, evictions, &host);
        }
    }
}

// Unconditional: a newer entry for the same host is removed as well.
fn remove(entries: &DashMap<String, IpAddr>, evictions: &AtomicU64, host: &str) {
    if entries.remove(host).is_some() {
        evictions.fetch_add(1, Ordering::Relaxed);
        trace!(host = %host, "resolution evicted");
    }
}
