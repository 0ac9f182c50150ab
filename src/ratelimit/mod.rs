//! Rate limiting logic and state management.

mod constraint;
mod expiring;
mod limiter;
mod queue;
mod store;

pub use constraint::{RateConstraint, TimeWindow};
pub use expiring::ExpiringStore;
pub use limiter::{
    ConstraintUsage, Limiter, LimiterBuilder, LimiterStats, StoreFactory, ThrottleEvent,
    ThrottleHook, TimestampPolicy,
};
pub use queue::QueueStore;
pub use store::{StoreKind, TimestampStore};
