//! Alert rate limiting

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minimum spacing between deliveries at the `immediate` rate
pub const IMMEDIATE_FLOOR_SECS: i64 = 60;

/// How often alerts may be delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertRate {
    #[default]
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "hourly")]
    Hourly,
}

impl AlertRate {
    pub fn min_interval(self) -> Duration {
        match self {
            Self::Immediate => Duration::seconds(IMMEDIATE_FLOOR_SECS),
            Self::FifteenMinutes => Duration::seconds(15 * 60),
            Self::ThirtyMinutes => Duration::seconds(30 * 60),
            Self::Hourly => Duration::seconds(3600),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::FifteenMinutes => "15min",
            Self::ThirtyMinutes => "30min",
            Self::Hourly => "hourly",
        }
    }
}

impl FromStr for AlertRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "15min" => Ok(Self::FifteenMinutes),
            "30min" => Ok(Self::ThirtyMinutes),
            "hourly" => Ok(Self::Hourly),
            other => Err(format!("unknown alert rate: {other}")),
        }
    }
}

impl fmt::Display for AlertRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp of the last delivered alert for one scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CooldownTracker {
    last_alert_sent_at: Option<DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_alert_sent_at(&self) -> Option<DateTime<Utc>> {
        self.last_alert_sent_at
    }

    /// True while `now` is closer than `interval` to the last alert.
    /// An instant before the last alert counts as inside the cooldown.
    pub fn is_active(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        self.last_alert_sent_at
            .is_some_and(|last| now - last < interval)
    }

    /// Record a delivery decision; the timestamp never moves backward.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_alert_sent_at = Some(match self.last_alert_sent_at {
            Some(last) if last > now => last,
            _ => now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rate_intervals() {
        assert_eq!(AlertRate::Immediate.min_interval().num_seconds(), 60);
        assert_eq!(AlertRate::FifteenMinutes.min_interval().num_seconds(), 900);
        assert_eq!(AlertRate::ThirtyMinutes.min_interval().num_seconds(), 1800);
        assert_eq!(AlertRate::Hourly.min_interval().num_seconds(), 3600);
        assert_eq!("15MIN".parse::<AlertRate>().unwrap(), AlertRate::FifteenMinutes);
        assert!("weekly".parse::<AlertRate>().is_err());
    }

    #[test]
    fn test_rate_serde_names() {
        let json = serde_json::to_string(&AlertRate::ThirtyMinutes).unwrap();
        assert_eq!(json, "\"30min\"");
        let rate: AlertRate = serde_json::from_str("\"hourly\"").unwrap();
        assert_eq!(rate, AlertRate::Hourly);
    }

    #[test]
    fn test_tracker_never_moves_backward() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut tracker = CooldownTracker::new();
        assert!(!tracker.is_active(t0, Duration::seconds(60)));

        tracker.record(t0);
        assert!(tracker.is_active(t0 + Duration::seconds(59), Duration::seconds(60)));
        assert!(!tracker.is_active(t0 + Duration::seconds(60), Duration::seconds(60)));
        assert!(tracker.is_active(t0 - Duration::seconds(600), Duration::seconds(60)));

        tracker.record(t0 - Duration::seconds(30));
        assert_eq!(tracker.last_alert_sent_at(), Some(t0));
    }
}
