use anyhow::{anyhow, Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::cancel::CancelSignal;

pub const DEFAULT_MAX_ATTEMPTS: usize = 10;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Failures an operation can report that change how the next attempt is
/// scheduled. Anything else is retried on the policy's own backoff.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// The backend asked us to slow down, optionally saying for how long.
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

impl AttemptError {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::TimedOut(_) => None,
        }
    }
}

/// Bounded retry budget. `max_attempts` counts every call, the first one
/// included, so a budget of 10 means at most 10 calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single call. An attempt that runs past it counts as
    /// failed.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::ZERO,
            max_delay: DEFAULT_MAX_DELAY,
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay.max(base_delay);
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Option<Duration>) -> Self {
        self.attempt_timeout = attempt_timeout.filter(|limit| !limit.is_zero());
        self
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: usize,
}

impl<T> RetryOutcome<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs `operation` until it succeeds, the budget is spent, or `cancel`
/// fires. The closure receives the 1-based attempt number.
///
/// A failure carrying [`AttemptError::RateLimited`] with a `retry_after`
/// hint delays the next attempt by at least that long, capped at
/// `max_delay`.
pub async fn retry_bounded<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: Option<&CancelSignal>,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0usize;
    let mut delay = policy.base_delay;
    let mut last_error: Option<Error> = None;

    while attempts < policy.max_attempts {
        if is_cancelled(cancel) {
            break;
        }
        attempts += 1;
        let attempt = operation(attempts);
        let result = match policy.attempt_timeout {
            Some(limit) => match timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(AttemptError::TimedOut(limit).into()),
            },
            None => attempt.await,
        };
        let hint = match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) => {
                warn!(
                    "{} failed (attempt {}/{}): {:#}",
                    label, attempts, policy.max_attempts, err
                );
                let hint = retry_after_hint(&err);
                last_error = Some(err);
                hint
            }
        };
        if attempts < policy.max_attempts {
            let pause = match hint {
                Some(retry_after) => delay.max(retry_after.min(policy.max_delay)),
                None => delay,
            };
            if !pause.is_zero() && !wait(pause, cancel).await {
                break;
            }
            delay = next_delay(delay, policy.max_delay);
        }
    }

    let error = match last_error {
        Some(err) if is_cancelled(cancel) => {
            err.context(format!("{} cancelled after {} attempts", label, attempts))
        }
        Some(err) => err.context(format!("{} gave up after {} attempts", label, attempts)),
        None if is_cancelled(cancel) => anyhow!("{} cancelled before the first attempt", label),
        None => anyhow!("{} has no attempts in its retry budget", label),
    };
    RetryOutcome {
        result: Err(error),
        attempts,
    }
}

pub(crate) fn next_delay(current: Duration, max: Duration) -> Duration {
    let next = current.saturating_mul(2);
    if next > max { max } else { next }
}

fn retry_after_hint(err: &Error) -> Option<Duration> {
    err.downcast_ref::<AttemptError>()
        .and_then(AttemptError::retry_after)
}

fn is_cancelled(cancel: Option<&CancelSignal>) -> bool {
    cancel.map(CancelSignal::is_cancelled).unwrap_or(false)
}

// false when the wait was cut short by cancellation
async fn wait(delay: Duration, cancel: Option<&CancelSignal>) -> bool {
    match cancel {
        Some(cancel) => {
            tokio::select! {
                _ = sleep(delay) => true,
                _ = cancel.cancelled() => false,
            }
        }
        None => {
            sleep(delay).await;
            true
        }
    }
}
