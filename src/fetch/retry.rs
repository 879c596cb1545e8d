use std::fmt::Display;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Runs `op` until it succeeds or the policy runs out, sleeping `backoff`
/// between attempts. `op` receives the 1-based attempt number.
pub fn retry_with_policy<T, E, F>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<Attempted<T>, RetryExhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) if attempt >= policy.max_attempts => {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: error,
                })
            }
            Err(error) => {
                warn!(
                    target_name = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "attempt failed; retrying"
                );
                if !policy.backoff.is_zero() {
                    thread::sleep(policy.backoff);
                }
                attempt += 1;
            }
        }
    }
}
