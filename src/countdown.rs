//! Deadline countdowns.
//!
//! Everything here is a pure function of `(due, now)` evaluated in one
//! reference timezone, so callers can recompute every task on every tick.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_MINUTE: i64 = 60;

/// Default "due within the hour" window.
pub const DEFAULT_CRITICAL_SECS: i64 = SECONDS_PER_HOUR;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownResult {
    /// `due - now` in whole seconds; zero or negative means overdue.
    pub signed_remaining: i64,
    pub is_overdue: bool,
    pub is_critical: bool,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl CountdownResult {
    pub fn urgency(&self) -> Urgency {
        if self.is_overdue {
            Urgency::Overdue
        } else if self.is_critical {
            Urgency::Critical
        } else {
            Urgency::Normal
        }
    }

    /// `HH:MM:SS`, prefixed with `Nd ` once a full day is involved.
    pub fn format_clock(&self) -> String {
        let clock = format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds);
        if self.days > 0 {
            format!("{}d {}", self.days, clock)
        } else {
            clock
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CountdownEngine {
    tz: Tz,
    critical_secs: i64,
}

impl Default for CountdownEngine {
    fn default() -> Self {
        CountdownEngine::new(chrono_tz::Europe::Moscow, DEFAULT_CRITICAL_SECS)
    }
}

impl CountdownEngine {
    pub fn new(tz: Tz, critical_secs: i64) -> Self {
        CountdownEngine { tz, critical_secs }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn compute(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> CountdownResult {
        // Both ends in the same zone: a DST jump between them cannot skew the difference
        let due_local = due.with_timezone(&self.tz);
        let now_local = now.with_timezone(&self.tz);
        let signed_remaining = (due_local - now_local).num_seconds();
        let abs = signed_remaining.abs();

        CountdownResult {
            signed_remaining,
            is_overdue: signed_remaining <= 0,
            is_critical: signed_remaining > 0 && signed_remaining < self.critical_secs,
            days: abs / SECONDS_PER_DAY,
            hours: (abs % SECONDS_PER_DAY) / SECONDS_PER_HOUR,
            minutes: (abs % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE,
            seconds: abs % SECONDS_PER_MINUTE,
        }
    }

    /// Deadline as shown under the timer, e.g. `01 May 2024, 13:00`.
    pub fn format_due(&self, due: DateTime<Utc>) -> String {
        due.with_timezone(&self.tz).format("%d %b %Y, %H:%M").to_string()
    }
}

/// Countdown with the default zone and threshold.
pub fn compute_countdown(due: DateTime<Utc>, now: DateTime<Utc>) -> CountdownResult {
    CountdownEngine::default().compute(due, now)
}
