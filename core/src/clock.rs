//! Wall-clock access. Owns "now" so month rollover is testable.

use crate::types::{MonthKey, TimestampMs};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used in tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Midnight UTC on the given date. An invalid date yields the epoch.
    pub fn at_date(year: i32, month: u32, day: u32) -> Self {
        let now = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| midnight.and_utc())
            .unwrap_or_default();
        Self::new(now)
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// `YYYY-MM` marker for the month containing `now`.
pub fn month_key(now: DateTime<Utc>) -> MonthKey {
    now.format("%Y-%m").to_string()
}

/// `YYYY-MM` marker for the month after the one containing `now`.
pub fn next_month_key(now: DateTime<Utc>) -> MonthKey {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    format!("{year:04}-{month:02}")
}

pub fn timestamp_ms(now: DateTime<Utc>) -> TimestampMs {
    now.timestamp_millis()
}
