use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ErrorKind;

/// Exponential retry policy applied to failed passes over the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first pass.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for computed backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exponential multiplier per retry step.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Error kinds eligible for retry.
    #[serde(default = "default_retryable_kinds")]
    pub retryable_kinds: BTreeSet<ErrorKind>,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_kinds() -> BTreeSet<ErrorKind> {
    BTreeSet::from([ErrorKind::Timeout, ErrorKind::Transient])
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_kinds: default_retryable_kinds(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn exponential(max_retries: u32, initial_delay_ms: u64, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            backoff_multiplier,
            ..Self::default()
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_retryable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Whether `kind` is classified as retryable, regardless of budget.
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// True iff another retry is allowed and `kind` is retryable.
    pub fn should_retry(&self, kind: ErrorKind, retries_done: u32) -> bool {
        retries_done < self.max_retries && self.is_retryable(kind)
    }

    /// `min(initial * multiplier^retries_done, max)`; zero-based, so the first
    /// retry waits exactly `initial_delay_ms`.
    pub fn next_delay(&self, retries_done: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(i32::try_from(retries_done).unwrap_or(i32::MAX));
        let base = self.initial_delay_ms as f64 * exp;
        let capped = if base.is_finite() {
            (base.round() as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(capped)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            ));
        }
        if self.retryable_kinds.contains(&ErrorKind::Cancelled) {
            return Err("cancelled is never retryable".into());
        }
        Ok(())
    }
}

/// What the session does after a failed pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then run pass number `attempt` (1-based retry count).
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// Per-session retry bookkeeping.
///
/// `attempt` counts retries already scheduled and never exceeds the policy's
/// `max_retries`. After a `GiveUp` the state is inert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
    last_error: Option<ErrorKind>,
    next_delay: Option<Duration>,
    exhausted: bool,
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Records a failed pass and decides what happens next.
    pub fn record_failure(&mut self, kind: ErrorKind, policy: &RetryPolicy) -> RetryDecision {
        if self.exhausted {
            return RetryDecision::GiveUp;
        }
        self.last_error = Some(kind);
        if !policy.should_retry(kind, self.attempt) {
            self.exhausted = true;
            self.next_delay = None;
            return RetryDecision::GiveUp;
        }
        let delay = policy.next_delay(self.attempt);
        self.attempt += 1;
        self.next_delay = Some(delay);
        RetryDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// Clears the counters after a clean pass.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
