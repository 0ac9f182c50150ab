//! Ordered-queue timestamp store.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::constraint::RateConstraint;
use super::store::TimestampStore;
use crate::error::Result;

/// Admission history kept oldest-first in a `VecDeque`.
///
/// Because writers are serialized, instants arrive in chronological order
/// and pruning only ever pops from the front.
#[derive(Debug)]
pub struct QueueStore {
    constraint: RateConstraint,
    timestamps: VecDeque<Instant>,
}

impl QueueStore {
    /// Create an empty store for `constraint`.
    pub fn new(constraint: RateConstraint) -> Self {
        // The window never holds more than max_actions after pruning.
        let capacity = constraint.max_actions().min(4096) as usize + 1;
        Self {
            constraint,
            timestamps: VecDeque::with_capacity(capacity),
        }
    }

    fn is_expired(&self, ts: Instant, now: Instant) -> bool {
        ts + self.constraint.period() <= now
    }
}

#[async_trait]
impl TimestampStore for QueueStore {
    fn constraint(&self) -> &RateConstraint {
        &self.constraint
    }

    async fn prune(&mut self, now: Instant) -> Result<()> {
        while let Some(&oldest) = self.timestamps.front() {
            if !self.is_expired(oldest, now) {
                break;
            }
            self.timestamps.pop_front();
        }
        Ok(())
    }

    async fn wait_time(&self, now: Instant) -> Result<Duration> {
        if (self.timestamps.len() as u64) < self.constraint.max_actions() {
            return Ok(Duration::ZERO);
        }

        match self.timestamps.front() {
            Some(&oldest) => Ok((oldest + self.constraint.period()).saturating_duration_since(now)),
            None => Ok(Duration::ZERO),
        }
    }

    async fn record(&mut self, at: Instant) -> Result<()> {
        debug_assert!(self.timestamps.back().map_or(true, |&last| last <= at));
        self.timestamps.push_back(at);
        Ok(())
    }

    async fn count(&self, now: Instant) -> Result<u64> {
        let live = self
            .timestamps
            .iter()
            .filter(|&&ts| !self.is_expired(ts, now))
            .count();
        Ok(live as u64)
    }

    async fn clear(&mut self) -> Result<()> {
        self.timestamps.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(period_ms: u64, max_actions: u64) -> QueueStore {
        QueueStore::new(RateConstraint::new(Duration::from_millis(period_ms), max_actions).unwrap())
    }

    #[tokio::test]
    async fn test_prune_on_empty_store_is_noop() {
        let mut store = store(100, 1);
        store.prune(Instant::now()).await.unwrap();
        assert_eq!(store.count(Instant::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_boundary_is_strict() {
        let mut store = store(100, 5);
        let start = Instant::now();
        store.record(start).await.unwrap();
        store.record(start + Duration::from_millis(1)).await.unwrap();

        // Exactly one period old counts as expired.
        store.prune(start + Duration::from_millis(100)).await.unwrap();
        assert_eq!(store.timestamps.len(), 1);
        assert_eq!(store.timestamps[0], start + Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_wait_time_below_limit_is_zero() {
        let mut store = store(1000, 3);
        let start = Instant::now();
        store.record(start).await.unwrap();
        store.record(start).await.unwrap();

        assert_eq!(store.wait_time(start).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_wait_time_at_limit_uses_oldest() {
        let mut store = store(100, 1);
        let start = Instant::now();
        store.record(start).await.unwrap();

        let now = start + Duration::from_millis(10);
        store.prune(now).await.unwrap();
        assert_eq!(store.wait_time(now).await.unwrap(), Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_wait_time_already_eligible_clamps_to_zero() {
        let mut store = store(100, 1);
        let start = Instant::now();
        store.record(start).await.unwrap();

        // Without pruning the oldest entry is stale; the wait must not go negative.
        assert_eq!(
            store.wait_time(start + Duration::from_millis(150)).await.unwrap(),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let mut store = store(100, 2);
        let start = Instant::now();
        store.record(start).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count(start).await.unwrap(), 0);
    }
}
