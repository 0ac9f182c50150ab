//! Timestamp store trait for abstracting history backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::{Duration, Instant};

use super::constraint::RateConstraint;
use super::expiring::ExpiringStore;
use super::queue::QueueStore;
use crate::error::Result;

/// Per-constraint record of recent admission instants.
///
/// A store is only ever touched from inside the limiter's admission section,
/// so implementations may assume a single writer and chronologically ordered
/// `record` calls. The methods are async and fallible so that a backend
/// living in an external cache can be plugged in.
#[async_trait]
pub trait TimestampStore: Send + Sync + Debug {
    /// The constraint this store enforces.
    fn constraint(&self) -> &RateConstraint;

    /// Discard every instant `ts` with `ts <= now - period`.
    async fn prune(&mut self, now: Instant) -> Result<()>;

    /// How long from `now` until one more admission is legal.
    ///
    /// Zero while fewer than `max_actions` instants are held, otherwise the
    /// time until the oldest one leaves the window, clamped at zero.
    async fn wait_time(&self, now: Instant) -> Result<Duration>;

    /// Append an admission instant.
    ///
    /// The limiter records into each store in turn. An error aborts the call
    /// without running the action, and stores already written keep the
    /// admission.
    async fn record(&mut self, at: Instant) -> Result<()>;

    /// Number of admissions still inside the window at `now`.
    async fn count(&self, now: Instant) -> Result<u64>;

    /// Drop all history.
    async fn clear(&mut self) -> Result<()>;
}

/// Which backend the limiter creates for each constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Ordered queue with explicit pruning from the front
    #[default]
    Queue,
    /// Cache whose entries expire on their own after the period
    Expiring,
}

impl StoreKind {
    /// Create an empty store of this kind for `constraint`.
    pub fn create(&self, constraint: RateConstraint) -> Box<dyn TimestampStore> {
        match self {
            StoreKind::Queue => Box::new(QueueStore::new(constraint)),
            StoreKind::Expiring => Box::new(ExpiringStore::new(constraint)),
        }
    }
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "queue" => Ok(StoreKind::Queue),
            "expiring" => Ok(StoreKind::Expiring),
            other => Err(format!("unknown store kind '{}'", other)),
        }
    }
}
