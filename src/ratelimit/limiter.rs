//! Core rate limiter implementation.
//!
//! Every call passes through one admission section guarded by an async
//! mutex: read the clock, prune every store, take the longest wait any
//! constraint demands, sleep it out while still holding the section, record
//! the admission in every store, release. The action then runs outside the
//! section, so a slow or failing action never blocks other callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, trace, warn};

use super::constraint::RateConstraint;
use super::store::{StoreKind, TimestampStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{PacerError, PerformError, Result};

/// Which instant is recorded for a call that had to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampPolicy {
    /// Re-read the clock after the wait. Keeps every window exact.
    #[default]
    PostWait,
    /// Record the instant sampled before the wait. Under sustained load the
    /// recorded history lags real time and the limit loosens.
    PreWait,
}

/// Emitted whenever an admission has to wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleEvent {
    /// How long the caller will be suspended
    pub wait: Duration,
    /// Position of the binding constraint in the limiter's constraint list
    pub constraint_index: usize,
    /// The binding constraint
    pub constraint: RateConstraint,
}

/// Callback invoked with every [`ThrottleEvent`], before the caller sleeps.
pub type ThrottleHook = Arc<dyn Fn(&ThrottleEvent) + Send + Sync>;

/// Creates the store for one constraint, for backends outside [`StoreKind`].
pub type StoreFactory = Box<dyn Fn(RateConstraint) -> Box<dyn TimestampStore> + Send + Sync>;

/// Counters describing the limiter's activity so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    /// Calls admitted (their action was or is being invoked)
    pub admitted: u64,
    /// Calls that had to wait, including ones cancelled during the wait
    pub throttled: u64,
    /// Calls aborted by their cancellation signal
    pub cancelled: u64,
    /// Sum of all completed waits
    pub total_wait: Duration,
}

/// Current occupancy of one constraint's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintUsage {
    pub constraint: RateConstraint,
    /// Admissions inside the trailing window
    pub in_window: u64,
    /// Admissions still possible right now
    pub remaining: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    admitted: AtomicU64,
    throttled: AtomicU64,
    cancelled: AtomicU64,
    total_wait_nanos: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> LimiterStats {
        LimiterStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            total_wait: Duration::from_nanos(self.total_wait_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Builder for a [`Limiter`].
///
/// ```
/// use pacer::ratelimit::{Limiter, RateConstraint, StoreKind};
///
/// # fn main() -> pacer::error::Result<()> {
/// let limiter = Limiter::builder()
///     .constraint(RateConstraint::per_second(10)?)
///     .constraint(RateConstraint::per_minute(100)?)
///     .store(StoreKind::Queue)
///     .build(|n: u32| async move { Ok::<_, std::io::Error>(n * 2) })?;
/// # drop(limiter);
/// # Ok(())
/// # }
/// ```
pub struct LimiterBuilder {
    constraints: Vec<RateConstraint>,
    store: StoreKind,
    store_factory: Option<StoreFactory>,
    policy: TimestampPolicy,
    clock: Arc<dyn Clock>,
    on_throttle: Option<ThrottleHook>,
}

impl LimiterBuilder {
    fn new() -> Self {
        Self {
            constraints: Vec::new(),
            store: StoreKind::default(),
            store_factory: None,
            policy: TimestampPolicy::default(),
            clock: Arc::new(SystemClock::new()),
            on_throttle: None,
        }
    }

    /// Add a constraint.
    pub fn constraint(mut self, constraint: RateConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Add several constraints.
    pub fn constraints(mut self, constraints: impl IntoIterator<Item = RateConstraint>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    /// Select the timestamp store backend.
    pub fn store(mut self, store: StoreKind) -> Self {
        self.store = store;
        self
    }

    /// Use a caller-supplied backend, such as an external cache, for every
    /// constraint. Takes precedence over [`store`](Self::store).
    pub fn store_factory(
        mut self,
        factory: impl Fn(RateConstraint) -> Box<dyn TimestampStore> + Send + Sync + 'static,
    ) -> Self {
        self.store_factory = Some(Box::new(factory));
        self
    }

    /// Choose which instant is recorded after a wait.
    pub fn timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the time source.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Observe every wait before the caller is suspended.
    pub fn on_throttle(mut self, hook: impl Fn(&ThrottleEvent) + Send + Sync + 'static) -> Self {
        self.on_throttle = Some(Arc::new(hook));
        self
    }

    /// Build the limiter around `action`.
    ///
    /// Fails with [`PacerError::InvalidConfiguration`] when no constraint was
    /// given.
    pub fn build<F>(self, action: F) -> Result<Limiter<F>> {
        if self.constraints.is_empty() {
            return Err(PacerError::InvalidConfiguration(
                "at least one rate constraint is required".to_string(),
            ));
        }

        let stores: Vec<Box<dyn TimestampStore>> = self
            .constraints
            .iter()
            .map(|constraint| match &self.store_factory {
                Some(factory) => factory(constraint.clone()),
                None => self.store.create(constraint.clone()),
            })
            .collect();

        debug!(
            constraints = ?self.constraints,
            store = ?self.store,
            policy = ?self.policy,
            "Creating rate limiter"
        );

        let (shutdown, _) = watch::channel(false);

        Ok(Limiter {
            action,
            constraints: self.constraints,
            stores: Mutex::new(stores),
            clock: self.clock,
            policy: self.policy,
            on_throttle: self.on_throttle,
            shutdown,
            stats: StatsCounters::default(),
        })
    }
}

/// Gates an action so that no configured constraint is ever exceeded.
///
/// The limiter is shared by reference (usually behind an `Arc`) between
/// any number of concurrent callers. Admission decisions are strictly
/// serialized; waiting callers are admitted in no particular order.
pub struct Limiter<F> {
    action: F,
    constraints: Vec<RateConstraint>,
    /// The admission section. Held from the clock read until every store
    /// has recorded the new admission, including across the wait.
    stores: Mutex<Vec<Box<dyn TimestampStore>>>,
    clock: Arc<dyn Clock>,
    policy: TimestampPolicy,
    on_throttle: Option<ThrottleHook>,
    /// Flips to `true` on dispose and wakes every suspended caller.
    shutdown: watch::Sender<bool>,
    stats: StatsCounters,
}

impl<F> fmt::Debug for Limiter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("constraints", &self.constraints)
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Limiter<()> {
    /// Start configuring a limiter.
    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::new()
    }
}

impl<F> Limiter<F> {
    /// Create a limiter with the default store, policy and clock.
    pub fn new(action: F, constraints: Vec<RateConstraint>) -> Result<Self> {
        Limiter::builder().constraints(constraints).build(action)
    }

    /// Run the action once all constraints allow it.
    ///
    /// Returns the action's result. An action error is passed back as
    /// [`PerformError::Action`]; its slot stays consumed.
    pub async fn perform<A, Fut, T, E>(&self, argument: A) -> std::result::Result<T, PerformError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.perform_with_cancel(argument, std::future::pending::<()>())
            .await
    }

    /// Like [`perform`](Self::perform), but gives up with
    /// [`PacerError::Cancelled`] as soon as `cancel` completes, provided the
    /// call has not been admitted yet.
    ///
    /// A cancelled call records nothing and never invokes the action.
    /// Dropping the returned future has the same effect.
    pub async fn perform_with_cancel<A, Fut, T, E, C>(
        &self,
        argument: A,
        cancel: C,
    ) -> std::result::Result<T, PerformError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Future<Output = ()>,
    {
        self.admit(cancel).await?;
        (self.action)(argument).await.map_err(PerformError::Action)
    }

    /// Wait for and record one admission. Returns the time spent waiting.
    async fn admit<C>(&self, cancel: C) -> Result<Duration>
    where
        C: Future<Output = ()>,
    {
        if self.is_disposed() {
            return Err(PacerError::Disposed);
        }

        tokio::pin!(cancel);
        let disposed = wait_disposed(self.shutdown.subscribe());
        tokio::pin!(disposed);

        let mut stores = tokio::select! {
            biased;
            _ = &mut disposed => return Err(PacerError::Disposed),
            _ = &mut cancel => return Err(self.cancelled()),
            guard = self.stores.lock() => guard,
        };

        // dispose() may have run while this caller was queued on the lock.
        if self.is_disposed() {
            return Err(PacerError::Disposed);
        }

        let now = self.clock.now();
        for store in stores.iter_mut() {
            store.prune(now).await?;
        }

        let mut wait = Duration::ZERO;
        let mut binding = None;
        for (index, store) in stores.iter().enumerate() {
            let store_wait = store.wait_time(now).await?;
            if store_wait > wait {
                wait = store_wait;
                binding = Some(index);
            }
        }

        trace!(wait_ms = wait.as_millis() as u64, "Admission decision");

        if let Some(index) = binding {
            let event = ThrottleEvent {
                wait,
                constraint_index: index,
                constraint: self.constraints[index].clone(),
            };
            debug!(
                wait_ms = wait.as_millis() as u64,
                constraint = %event.constraint,
                constraint_index = index,
                "Throttling call"
            );
            if let Some(hook) = &self.on_throttle {
                hook(&event);
            }
            self.stats.throttled.fetch_add(1, Ordering::Relaxed);

            tokio::select! {
                biased;
                _ = &mut disposed => return Err(PacerError::Disposed),
                _ = &mut cancel => return Err(self.cancelled()),
                _ = self.clock.sleep(wait) => {}
            }

            self.stats
                .total_wait_nanos
                .fetch_add(wait.as_nanos() as u64, Ordering::Relaxed);
        }

        let admitted_at = match self.policy {
            TimestampPolicy::PostWait => self.clock.now(),
            TimestampPolicy::PreWait => now,
        };
        // A failing backend leaves the stores before it one admission ahead.
        for (recorded, store) in stores.iter_mut().enumerate() {
            if let Err(err) = store.record(admitted_at).await {
                warn!(
                    recorded,
                    total = self.constraints.len(),
                    error = %err,
                    "Admission recorded in only some stores"
                );
                return Err(err);
            }
        }
        self.stats.admitted.fetch_add(1, Ordering::Relaxed);

        Ok(wait)
    }

    fn cancelled(&self) -> PacerError {
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!("Call cancelled before admission");
        PacerError::Cancelled
    }

    /// The configured constraints, in order.
    pub fn constraints(&self) -> &[RateConstraint] {
        &self.constraints
    }

    /// The configured timestamp policy.
    pub fn timestamp_policy(&self) -> TimestampPolicy {
        self.policy
    }

    /// Activity counters. Does not wait for the admission section.
    pub fn stats(&self) -> LimiterStats {
        self.stats.snapshot()
    }

    /// Occupancy of every constraint's window right now.
    ///
    /// Takes the admission section, so it queues behind a waiting caller.
    pub async fn usage(&self) -> Result<Vec<ConstraintUsage>> {
        if self.is_disposed() {
            return Err(PacerError::Disposed);
        }

        let mut stores = self.stores.lock().await;
        let now = self.clock.now();
        let mut usage = Vec::with_capacity(stores.len());
        for store in stores.iter_mut() {
            store.prune(now).await?;
            let in_window = store.count(now).await?;
            let constraint = store.constraint().clone();
            usage.push(ConstraintUsage {
                remaining: constraint.max_actions().saturating_sub(in_window),
                in_window,
                constraint,
            });
        }
        Ok(usage)
    }

    /// Whether `dispose` has been called.
    pub fn is_disposed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Tear the limiter down.
    ///
    /// Wakes every caller still waiting for admission (they fail with
    /// [`PacerError::Disposed`] without recording anything), then drops all
    /// history. Later calls fail with `Disposed`. Calling it again is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }

        let mut stores = self.stores.lock().await;
        for store in stores.iter_mut() {
            store.clear().await?;
        }

        info!(stats = ?self.stats.snapshot(), "Rate limiter disposed");
        Ok(())
    }
}

/// Resolves once the shutdown flag is set.
async fn wait_disposed(mut shutdown: watch::Receiver<bool>) {
    loop {
        let disposed = *shutdown.borrow_and_update();
        if disposed {
            return;
        }
        if shutdown.changed().await.is_err() {
            // Sender gone: the limiter itself was dropped.
            std::future::pending::<()>().await;
        }
    }
}
