//! Retrying operations that fail for transient reasons (mostly overloaded
//! git servers answering `HTTP code 503`).

use crate::config::RetryConfig;
use crate::error::{LineageError, Result};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempts run out.
///
/// The number of attempts is capped by the length of `backoff`; the delay
/// before attempt `n + 1` is `backoff[n]`. There is always at least one
/// attempt.
///
/// # Errors
/// The first non-transient error as is, or `RetriesExhausted` wrapping the
/// last transient one.
pub fn retry<T, F, P>(attempts: usize, backoff: &[Duration], is_transient: P, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
    P: Fn(&LineageError) -> bool,
{
    let attempts = attempts.min(backoff.len()).max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match op() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_transient(&err) {
            return Err(err);
        }
        if attempt >= attempts {
            return Err(LineageError::RetriesExhausted {
                attempts,
                last: Box::new(err),
            });
        }

        let delay = backoff.get(attempt - 1).copied().unwrap_or_default();
        warn!(
            attempt,
            attempts,
            delay_secs = delay.as_secs(),
            error = %err,
            "transient failure, retrying"
        );
        thread::sleep(delay);
    }
}

/// Retry settings resolved from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub intervals: Vec<Duration>,
    pub markers: Vec<String>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            attempts: config.attempts,
            intervals: config.intervals(),
            markers: config.transient_markers.clone(),
        }
    }

    /// Single attempt, nothing is transient.
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            intervals: vec![Duration::ZERO],
            markers: Vec::new(),
        }
    }

    /// An error is transient when its text contains one of the markers.
    pub fn is_transient(&self, err: &LineageError) -> bool {
        let text = err.to_string();
        self.markers.iter().any(|marker| text.contains(marker.as_str()))
    }

    pub fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        retry(self.attempts, &self.intervals, |err| self.is_transient(err), op)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
