//! Retry delay computation.
//!
//! These strategies are pure: this crate never loops retries itself. The
//! retry orchestrator owns the attempt counter and asks for a delay per
//! attempt.

use std::time::Duration;

use rand::Rng;

use crate::Error;
use crate::Result;

/// Attempts beyond this no longer grow the exponential delay; the shift
/// would overflow otherwise.
const MAX_EXPONENT_ATTEMPT: u32 = 30;

/// Jitter applied to a computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the raw delay.
    #[default]
    None,
    /// Uniform in `[0, raw)`.
    Full,
    /// `raw / 2` plus uniform in `(0, raw / 2]`.
    Equal,
}

/// A retry delay strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Retry immediately.
    None,
    /// Constant delay, optionally jittered uniformly in `[0, delay)`.
    Fixed {
        /// The constant delay.
        delay: Duration,
        /// Whether to jitter the delay.
        jitter: bool,
    },
    /// `min(max, base * 2^(n-2))` for attempt `n >= 2`, zero for the
    /// first attempt.
    Exponential {
        /// Delay unit for the second attempt.
        base: Duration,
        /// Upper bound on the raw delay.
        max: Duration,
        /// Jitter mode.
        jitter: Jitter,
    },
}

impl BackoffStrategy {
    /// Compute the delay before the given attempt.
    ///
    /// Attempts are 1-based; attempt 0 is out of domain.
    pub fn compute_delay(&self, attempt: u32) -> Result<Duration> {
        if attempt == 0 {
            return Err(Error::argument_invalid("attempt numbers start at 1"));
        }

        let delay = match *self {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed { delay, jitter } => {
                if jitter {
                    uniform_below(delay)
                } else {
                    delay
                }
            }
            BackoffStrategy::Exponential { base, max, jitter } => {
                if attempt == 1 {
                    return Ok(Duration::ZERO);
                }
                let exponent = attempt.min(MAX_EXPONENT_ATTEMPT) - 2;
                let raw = base
                    .checked_mul(1u32 << exponent)
                    .map_or(max, |d| d.min(max));

                match jitter {
                    Jitter::None => raw,
                    Jitter::Full => uniform_below(raw),
                    Jitter::Equal => {
                        let half = raw / 2;
                        half + uniform_above_zero(half)
                    }
                }
            }
        };

        Ok(delay)
    }
}

/// Uniform in `[0, upper)`; zero when `upper` is zero.
fn uniform_below(upper: Duration) -> Duration {
    let nanos = upper.as_nanos() as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
}

/// Uniform in `(0, upper]`; zero when `upper` is zero.
fn uniform_above_zero(upper: Duration) -> Duration {
    let nanos = upper.as_nanos() as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(1..=nanos))
}
