//! # Retry
//!
//! One bounded polling utility shared by the standalone loop, the restore backing-tier
//! wait, the scale-down wait and the wipe wait.
//!
//! An attempt either yields a value (done), yields nothing (sleep and try again) or
//! fails (propagated immediately). Cancellation is cooperative and only observed at
//! attempt boundaries.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound of the time spent sleeping
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Cooperative cancellation flag shared between a driver and its signal handler
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Result of a bounded poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Every attempt came back empty
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Run `attempt` until it yields a value, the budget is spent or `cancel` fires
///
/// The attempt number (starting at 1) is passed to the closure. A sleep of
/// `policy.interval` follows every empty attempt.
pub async fn poll_until<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &Cancellation,
    mut attempt: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for n in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Ok(PollOutcome::Cancelled { attempts: n - 1 });
        }
        if let Some(value) = attempt(n).await? {
            return Ok(PollOutcome::Ready(value));
        }
        debug!(
            attempt = n,
            max_attempts = policy.max_attempts,
            "not done, retrying in {:?}",
            policy.interval
        );
        tokio::time::sleep(policy.interval).await;
    }
    Ok(PollOutcome::Exhausted {
        attempts: policy.max_attempts,
    })
}
