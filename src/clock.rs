//! Time sources for the limiter.
//!
//! The limiter never reads the wall clock directly. It asks a [`Clock`] for
//! the current instant and suspends through [`Clock::sleep`], so tests can
//! substitute [`MockClock`] and drive admission decisions without real delays.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by tokio's timer.
///
/// Reads `tokio::time::Instant`, so a runtime started with a paused clock
/// (`#[tokio::test(start_paused = true)]`) drives it virtually.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Controllable clock for deterministic tests.
///
/// `sleep` advances the shared time by the requested duration and yields
/// once, so a suspended caller resumes at exactly the instant it waited for.
/// Clones share the same underlying time.
///
/// ```
/// use pacer::clock::{Clock, MockClock};
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now(), start + Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.current_time.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.current_time.lock() = instant;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current_time.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        clock.sleep(Duration::from_secs(5)).await;
        let t2 = clock.now();

        assert!(t2 - t1 >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mock_clock_sleep_advances_time() {
        let start = Instant::now();
        let clock = MockClock::new(start);

        clock.sleep(Duration::from_millis(90)).await;
        assert_eq!(clock.now(), start + Duration::from_millis(90));

        let shared = clock.clone();
        shared.advance(Duration::from_millis(10));
        assert_eq!(clock.now(), start + Duration::from_millis(100));

        clock.set(start);
        assert_eq!(shared.now(), start);
    }
}
