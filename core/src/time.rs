//! Time utilities and the clock capability used across signing.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::TimeDelta;
use chrono::Utc;

use crate::Error;
use crate::Result;

/// The datetime used by all signing operations, always in UTC.
pub type DateTime = chrono::DateTime<Utc>;

/// Return the current UTC time.
pub fn now() -> DateTime {
    Utc::now()
}

/// Format a datetime into the compact date form: `20220313`.
pub fn format_date(t: DateTime) -> String {
    t.format("%Y%m%d").to_string()
}

/// Format a datetime into the compact ISO 8601 form: `20220313T072004Z`.
pub fn format_iso8601(t: DateTime) -> String {
    t.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parse the compact ISO 8601 form produced by [`format_iso8601`].
pub fn parse_iso8601(s: &str) -> Result<DateTime> {
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%SZ")
        .map_err(|e| Error::unexpected(format!("failed to parse time: {e}")))?;
    Ok(naive.and_utc())
}

/// A source of "now" for signing and cache expiry decisions.
///
/// Signing binds the produced signature to a timestamp a server will
/// re-check, so callers that need to compensate for client/server clock
/// disagreement inject a [`SkewedClock`] rather than mutating any global
/// state.
pub trait Clock: Debug + Send + Sync + 'static {
    /// Current UTC time as seen by this clock.
    fn now(&self) -> DateTime;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime {
        now()
    }
}

/// A clock shifted by a fixed, signed offset.
///
/// The offset is typically computed by an external retry layer from a
/// server `Date` header after a clock-skew rejection and supplied on the
/// next attempt.
#[derive(Debug, Clone)]
pub struct SkewedClock {
    inner: Arc<dyn Clock>,
    offset: TimeDelta,
}

impl SkewedClock {
    /// Wrap `inner` with the given offset.
    pub fn new(inner: impl Clock, offset: TimeDelta) -> Self {
        Self {
            inner: Arc::new(inner),
            offset,
        }
    }

    /// The configured offset.
    pub fn offset(&self) -> TimeDelta {
        self.offset
    }
}

impl Clock for SkewedClock {
    fn now(&self) -> DateTime {
        self.inner.now() + self.offset
    }
}

/// A clock under manual control, for tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime>>,
}

impl ManualClock {
    /// Create a manual clock starting at `start`.
    pub fn new(start: DateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Set the clock to `t`.
    pub fn set(&self, t: DateTime) {
        *self.now.lock().expect("lock poisoned") = t;
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().expect("lock poisoned");
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime {
        *self.now.lock().expect("lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime {
        Utc.with_ymd_and_hms(2022, 3, 13, 7, 20, 4).unwrap()
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(t0()), "20220313");
    }

    #[test]
    fn test_format_iso8601() {
        assert_eq!(format_iso8601(t0()), "20220313T072004Z");
    }

    #[test]
    fn test_parse_iso8601_roundtrip() {
        assert_eq!(parse_iso8601("20220313T072004Z").unwrap(), t0());
        assert!(parse_iso8601("2022-03-13").is_err());
    }

    #[test]
    fn test_skewed_clock() {
        let base = ManualClock::new(t0());
        let skewed = SkewedClock::new(base, TimeDelta::seconds(-90));
        assert_eq!(skewed.now(), t0() - TimeDelta::seconds(90));
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(t0());
        clock.advance(TimeDelta::seconds(30));
        assert_eq!(clock.now(), t0() + TimeDelta::seconds(30));
    }
}
