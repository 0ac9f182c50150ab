//! Burst driver that fires many concurrent calls at one limiter.
//!
//! The driver only uses the limiter's public entry point. Completion order
//! is logged for diagnostics and nothing depends on it.

use rand::Rng;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::ratelimit::{Limiter, LimiterStats};

/// Outcome of a burst.
#[derive(Debug, Clone, Serialize)]
pub struct BurstReport {
    /// Calls issued
    pub calls: usize,
    /// Calls whose action completed successfully
    pub completed: usize,
    /// Calls that failed, in the limiter or in the action
    pub failed: usize,
    /// Wall time from the first call to the last completion
    pub elapsed: Duration,
    /// Limiter counters at the end of the burst
    pub stats: LimiterStats,
}

/// Issue `options.calls` concurrent `perform(i)` calls and wait for all of them.
pub async fn run_burst<F, Fut, T, E>(limiter: Arc<Limiter<F>>, options: &DriverConfig) -> BurstReport
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Display + Send + 'static,
{
    info!(
        calls = options.calls,
        concurrency = ?options.concurrency,
        jitter_ms = options.jitter_ms,
        "Starting burst"
    );

    let started = tokio::time::Instant::now();
    let permits = options.concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
    let finished = Arc::new(AtomicUsize::new(0));
    let progress_every = options.progress_every.max(1);

    let jitters: Vec<Duration> = {
        let mut rng = rand::thread_rng();
        (0..options.calls)
            .map(|_| match options.jitter_ms {
                0 => Duration::ZERO,
                max => Duration::from_millis(rng.gen_range(0..max)),
            })
            .collect()
    };

    let mut handles = Vec::with_capacity(options.calls);
    for (call, jitter) in jitters.into_iter().enumerate() {
        let limiter = limiter.clone();
        let permits = permits.clone();
        let finished = finished.clone();
        let total = options.calls;

        handles.push(tokio::spawn(async move {
            if !jitter.is_zero() {
                tokio::time::sleep(jitter).await;
            }
            let _permit = match permits {
                Some(permits) => permits.acquire_owned().await.ok(),
                None => None,
            };

            let outcome = limiter.perform(call).await;
            let done = finished.fetch_add(1, Ordering::Relaxed) + 1;

            let ok = match outcome {
                Ok(_) => {
                    debug!(call, done, "Call completed");
                    true
                }
                Err(err) => {
                    warn!(call, error = %err, "Call failed");
                    false
                }
            };
            if done % progress_every == 0 || done == total {
                info!(done, total, "Burst progress");
            }
            ok
        }));
    }

    let mut completed = 0;
    let mut failed = 0;
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(true) => completed += 1,
            Ok(false) => failed += 1,
            Err(err) => {
                warn!(error = %err, "Call task panicked");
                failed += 1;
            }
        }
    }

    let report = BurstReport {
        calls: options.calls,
        completed,
        failed,
        elapsed: started.elapsed(),
        stats: limiter.stats(),
    };
    info!(
        completed = report.completed,
        failed = report.failed,
        elapsed_ms = report.elapsed.as_millis() as u64,
        throttled = report.stats.throttled,
        "Burst finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateConstraint;
    use std::convert::Infallible;

    fn options(calls: usize) -> DriverConfig {
        DriverConfig {
            calls,
            concurrency: None,
            jitter_ms: 0,
            progress_every: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_completes_every_call() {
        let limiter = Arc::new(
            Limiter::new(
                |i: usize| async move { Ok::<_, Infallible>(i) },
                vec![RateConstraint::new(Duration::from_millis(100), 2).unwrap()],
            )
            .unwrap(),
        );

        let report = run_burst(limiter, &options(10)).await;

        assert_eq!(report.completed, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(report.stats.admitted, 10);
        assert_eq!(report.stats.throttled, 4);
        // Pairs are admitted every 100ms; the fifth pair at 400ms.
        assert!(report.elapsed >= Duration::from_millis(400));
        assert!(report.elapsed < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_counts_action_failures() {
        let limiter = Arc::new(
            Limiter::new(
                |i: usize| async move {
                    if i % 2 == 0 {
                        Ok(i)
                    } else {
                        Err(format!("odd call {}", i))
                    }
                },
                vec![RateConstraint::per_second(100).unwrap()],
            )
            .unwrap(),
        );

        let mut opts = options(6);
        opts.concurrency = Some(2);
        opts.jitter_ms = 20;
        let report = run_burst(limiter, &opts).await;

        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(report.stats.admitted, 6);
    }
}
