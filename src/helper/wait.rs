//! Wait until a remote object reaches a target state.
//!
//! A refresh function reports the current state; while it is one of the
//! pending states the waiter sleeps with exponential backoff. The first
//! poll happens after [`StateChangeConf::delay`], later polls are spaced by
//! at least [`StateChangeConf::min_timeout`] and at most
//! [`MAX_POLL_INTERVAL`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::error::ApiError;

/// Upper bound of the backoff between two polls.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Why a wait ended without reaching a target state.
#[derive(Debug, Error)]
pub enum WaitError {
    /// The refresh function failed.
    #[error("{0}")]
    Refresh(#[from] ApiError),

    /// The object reported a state that is neither pending nor target.
    #[error("unexpected state '{state}', wanted target '{}'", .target.join(", "))]
    UnexpectedState {
        /// State that was reported.
        state: String,
        /// Accepted target states.
        target: Vec<String>,
    },

    /// The target state was not reached in time.
    #[error("timeout while waiting for state to become '{}' (last state: '{}', timeout: {timeout:?})", .target.join(", "), .last_state.as_deref().unwrap_or(""))]
    Timeout {
        /// Last state that was reported, if any poll completed.
        last_state: Option<String>,
        /// Accepted target states.
        target: Vec<String>,
        /// Configured timeout.
        timeout: Duration,
    },
}

/// Polling configuration.
#[derive(Debug, Clone)]
pub struct StateChangeConf {
    /// States that mean "keep waiting".
    pub pending: Vec<String>,
    /// States that end the wait successfully.
    pub target: Vec<String>,
    /// Wait before the first poll.
    pub delay: Duration,
    /// Smallest interval between two polls.
    pub min_timeout: Duration,
    /// Overall deadline, measured from the start of the wait.
    pub timeout: Duration,
}

impl StateChangeConf {
    /// Configuration with no delay, no minimum interval and the given timeout.
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            min_timeout: Duration::ZERO,
            timeout,
        }
    }

    /// Set the wait before the first poll.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the smallest interval between two polls.
    pub fn with_min_timeout(mut self, min_timeout: Duration) -> Self {
        self.min_timeout = min_timeout;
        self
    }

    /// Interval to sleep after the given (zero based) poll.
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let grown = INITIAL_POLL_INTERVAL.saturating_mul(factor).min(MAX_POLL_INTERVAL);
        grown.max(self.min_timeout)
    }

    /// Poll `refresh` until it reports a target state.
    ///
    /// `refresh` returns the current object together with its state name;
    /// the object of the final poll is returned.
    pub async fn wait_for_state<T, F, Fut>(&self, mut refresh: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(T, String), ApiError>>,
    {
        let deadline = Instant::now() + self.timeout;
        let mut last_state: Option<String> = None;
        let timed_out = |last_state: Option<String>| WaitError::Timeout {
            last_state,
            target: self.target.clone(),
            timeout: self.timeout,
        };

        if !self.delay.is_zero() {
            if Instant::now() + self.delay >= deadline {
                return Err(timed_out(None));
            }
            sleep(self.delay).await;
        }

        let mut attempt = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let (object, state) = match tokio::time::timeout(remaining, refresh()).await {
                Ok(result) => result?,
                Err(_) => return Err(timed_out(last_state)),
            };
            trace!(state = %state, attempt, "Refreshed state");

            if self.target.iter().any(|t| *t == state) {
                return Ok(object);
            }
            if !self.pending.iter().any(|p| *p == state) {
                return Err(WaitError::UnexpectedState {
                    state,
                    target: self.target.clone(),
                });
            }
            last_state = Some(state);

            let interval = self.interval_for_attempt(attempt);
            if Instant::now() + interval >= deadline {
                return Err(timed_out(last_state));
            }
            sleep(interval).await;
            attempt = attempt.saturating_add(1);
        }
    }
}
