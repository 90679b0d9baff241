//! Time-of-day notification window

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::clock::hhmm;

/// Interval of the day during which alerts may be delivered.
///
/// `start > end` describes an overnight window straddling midnight.
/// Both ends are inclusive at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyWindow {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl NotifyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whole-day window (00:00-23:59)
    pub fn always() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is a valid time"),
            end: NaiveTime::from_hms_opt(23, 59, 0).expect("23:59 is a valid time"),
        }
    }

    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let time = truncate_to_minute(time);
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }

    /// Whether `now` falls inside the window as seen in `timezone`
    pub fn contains_instant(&self, now: DateTime<Utc>, timezone: Tz) -> bool {
        self.contains(local_clock(now, timezone))
    }
}

impl Default for NotifyWindow {
    fn default() -> Self {
        Self::always()
    }
}

/// Wall-clock `HH:MM` of an instant in a timezone
pub fn local_clock(now: DateTime<Utc>, timezone: Tz) -> NaiveTime {
    truncate_to_minute(now.with_timezone(&timezone).time())
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}
