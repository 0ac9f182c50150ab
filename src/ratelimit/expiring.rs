//! Auto-expiring cache timestamp store.
//!
//! Entries carry their own expiry deadline (`recorded + period`) and vanish
//! from every read once it has passed, the way a TTL cache behaves. There is
//! no ordered queue to trim; `prune` only reclaims memory held by entries
//! that are already invisible.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

use super::constraint::RateConstraint;
use super::store::TimestampStore;
use crate::error::Result;

/// Admission history held in a TTL cache keyed by insertion sequence.
///
/// The limiter only reaches it from inside the admission section. `DashMap`
/// and the atomic key counter stand in for a shared external cache, which
/// other processes could read concurrently.
#[derive(Debug)]
pub struct ExpiringStore {
    constraint: RateConstraint,
    /// Sequence number -> expiry deadline
    entries: DashMap<u64, Instant>,
    next_key: AtomicU64,
}

impl ExpiringStore {
    /// Create an empty store for `constraint`.
    pub fn new(constraint: RateConstraint) -> Self {
        Self {
            constraint,
            entries: DashMap::new(),
            next_key: AtomicU64::new(0),
        }
    }

    /// Deadlines of entries still alive at `now`.
    fn live_deadlines(&self, now: Instant) -> impl Iterator<Item = Instant> + '_ {
        self.entries
            .iter()
            .map(|entry| *entry.value())
            .filter(move |&deadline| deadline > now)
    }
}

#[async_trait]
impl TimestampStore for ExpiringStore {
    fn constraint(&self) -> &RateConstraint {
        &self.constraint
    }

    async fn prune(&mut self, now: Instant) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|_, deadline| *deadline > now);
        trace!(
            evicted = before - self.entries.len(),
            "Evicted expired cache entries"
        );
        Ok(())
    }

    async fn wait_time(&self, now: Instant) -> Result<Duration> {
        let mut live = 0u64;
        let mut earliest: Option<Instant> = None;
        for deadline in self.live_deadlines(now) {
            live += 1;
            earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
        }

        if live < self.constraint.max_actions() {
            return Ok(Duration::ZERO);
        }
        Ok(earliest.map_or(Duration::ZERO, |deadline| {
            deadline.saturating_duration_since(now)
        }))
    }

    async fn record(&mut self, at: Instant) -> Result<()> {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, at + self.constraint.period());
        Ok(())
    }

    async fn count(&self, now: Instant) -> Result<u64> {
        Ok(self.live_deadlines(now).count() as u64)
    }

    async fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(period_ms: u64, max_actions: u64) -> ExpiringStore {
        ExpiringStore::new(RateConstraint::new(Duration::from_millis(period_ms), max_actions).unwrap())
    }

    #[tokio::test]
    async fn test_entries_expire_without_pruning() {
        let mut store = store(100, 1);
        let start = Instant::now();
        store.record(start).await.unwrap();

        assert_eq!(store.count(start + Duration::from_millis(99)).await.unwrap(), 1);
        assert_eq!(store.count(start + Duration::from_millis(100)).await.unwrap(), 0);
        assert_eq!(
            store.wait_time(start + Duration::from_millis(100)).await.unwrap(),
            Duration::ZERO
        );
        // Still physically present until pruned.
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_prune_reclaims_expired_entries() {
        let mut store = store(100, 3);
        let start = Instant::now();
        store.record(start).await.unwrap();
        store.record(start + Duration::from_millis(50)).await.unwrap();

        store.prune(start + Duration::from_millis(100)).await.unwrap();
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_time_uses_earliest_deadline() {
        let mut store = store(100, 2);
        let start = Instant::now();
        store.record(start).await.unwrap();
        store.record(start + Duration::from_millis(20)).await.unwrap();

        let now = start + Duration::from_millis(30);
        assert_eq!(store.wait_time(now).await.unwrap(), Duration::from_millis(70));
    }
}
