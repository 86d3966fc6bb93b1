//! Retry and polling helpers
//!
//! Shared by the pipeline execution chain: exponential backoff around a
//! fallible operation, and periodic polling of an external status with a
//! ceiling. Both stop early when their cancellation token fires.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Backoff settings for [`retry_with_backoff`]
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every further retry
    pub base_delay: Duration,
}

#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error
    Exhausted { attempts: u32, last: E },
    Cancelled,
}

/// Run `op` until it succeeds, retrying with exponential backoff.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_retries + 1;
    let mut attempt = 0;
    let mut delay = policy.base_delay;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempt(s)", what, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e });
                }

                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, max_attempts, e, delay
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = time::sleep(delay) => {}
                }

                delay *= 2;
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum PollError<E> {
    /// The ceiling elapsed before a terminal answer
    TimedOut,
    /// The status query itself failed
    Failed(E),
    Cancelled,
}

/// Query `probe` every `interval` until it yields a value.
///
/// The first query happens one interval after the call. `Ok(None)` means
/// "not there yet"; an error stops polling immediately.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    ceiling: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let polling = async {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => continue,
                Err(e) => return Err(PollError::Failed(e)),
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        result = time::timeout(ceiling, polling) => result.unwrap_or(Err(PollError::TimedOut)),
    }
}
