//! Retry bookkeeping for the connection lifecycle.
//!
//! Every time a session falls back to searching (search timeout, failed
//! connect, dropped link) it consults a [`RetryState`]. The state counts
//! attempts and asks a [`Backoff`] policy how long to wait before the next
//! search.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use calypso_core::{Backoff, RetryDecision, RetryState};
//!
//! let mut retry = RetryState::new();
//! let backoff = Backoff::default();
//!
//! assert_eq!(
//!     retry.next(1, &backoff),
//!     RetryDecision::Retry { attempt: 1, delay: Duration::from_millis(250) }
//! );
//! assert_eq!(retry.next(1, &backoff), RetryDecision::Exhausted { attempts: 1 });
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Half a second, the unit of the default backoff.
const HALF_STEP_UNIT: Duration = Duration::from_millis(500);

/// Delay policy between retries.
#[derive(Clone, Default)]
pub enum Backoff {
    /// `attempt / 2 × 500 ms`: 250 ms, 500 ms, 750 ms, ...
    #[default]
    HalfStep,
    /// The same delay before every retry.
    Fixed(Duration),
    /// `initial × multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Caller-supplied function of the attempt number.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backoff::HalfStep => f.write_str("HalfStep"),
            Backoff::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            Backoff::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Backoff {
    /// Wrap a custom delay function.
    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Backoff::Custom(Arc::new(f))
    }

    /// Calculate the delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Backoff::HalfStep => HALF_STEP_UNIT.saturating_mul(attempt) / 2,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = initial.as_millis() as f64 * multiplier.powi(exponent);
                if !delay_ms.is_finite() || delay_ms >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(delay_ms as u64)
                }
            }
            Backoff::Custom(f) => f(attempt),
        }
    }

    /// Validate the policy parameters.
    ///
    /// Exponential backoff needs `multiplier >= 1.0`, a non-zero `initial`
    /// and `max >= initial`.
    pub fn validate(&self) -> Result<()> {
        if let Backoff::Exponential {
            initial,
            multiplier,
            max,
        } = self
        {
            if *multiplier < 1.0 {
                return Err(Error::invalid_config("backoff multiplier must be >= 1.0"));
            }
            if initial.is_zero() {
                return Err(Error::invalid_config("initial backoff delay must be > 0"));
            }
            if max < initial {
                return Err(Error::invalid_config("max backoff delay must be >= initial delay"));
            }
        }
        Ok(())
    }
}

/// What to do after a failed search or a lost link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Search again after `delay`. `attempt` is the new counter value.
    Retry { attempt: u32, delay: Duration },
    /// No retries left; the session ends.
    Exhausted { attempts: u32 },
}

/// Attempt counter for one driver session.
///
/// The counter only grows. With `max_retries > 0` it never exceeds
/// `max_retries`; with `max_retries == 0` retries are unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
}

impl RetryState {
    /// Create a fresh counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retries scheduled so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Decide whether to schedule another search.
    pub fn next(&mut self, max_retries: u32, backoff: &Backoff) -> RetryDecision {
        if max_retries > 0 && self.attempt >= max_retries {
            return RetryDecision::Exhausted {
                attempts: self.attempt,
            };
        }
        self.attempt = self.attempt.saturating_add(1);
        RetryDecision::Retry {
            attempt: self.attempt,
            delay: backoff.delay_for_attempt(self.attempt),
        }
    }
}
