//! Wall-clock abstraction.
//!
//! Every timestamp the control plane persists is an RFC 3339 string in UTC
//! with millisecond precision and a `Z` suffix, so lexicographic order on the
//! string form equals temporal order. Components read time exclusively
//! through [`Clock`] so tests can pin and advance it deterministically.

use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{AuthPlaneError, Result};

/// Format a timestamp the way the snapshot stores them.
pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp back into a UTC instant.
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| AuthPlaneError::validation(format!("Invalid RFC 3339 timestamp '{}': {}", value, err)))
}

/// Read-only time source shared by every component.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current instant formatted for persistence.
    fn now_iso(&self) -> String {
        format_rfc3339(self.now())
    }

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Whole seconds since the Unix epoch (floor of the millisecond value).
    fn now_seconds(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: starts at a fixed instant and only moves
/// when told to.
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    /// Create a clock pinned to the given instant.
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Create a clock pinned to an RFC 3339 timestamp.
    pub fn fixed(at: &str) -> Result<Self> {
        Ok(Self::new(parse_rfc3339(at)?))
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_seconds(&self, seconds: i64) {
        let mut now = self.now.lock().expect("test clock lock");
        *now += chrono::Duration::seconds(seconds);
    }

    /// Move the clock forward by milliseconds.
    pub fn advance_millis(&self, millis: i64) {
        let mut now = self.now.lock().expect("test clock lock");
        *now += chrono::Duration::milliseconds(millis);
    }

    /// Pin the clock to a new instant.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().expect("test clock lock");
        *now = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("test clock lock")
    }
}
