//! Reset Periods
//!
//! Calendar windows over which usage is counted. All arithmetic is UTC;
//! weeks start on Sunday.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How often consumed usage rolls back to zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    /// Never resets
    None,
    /// Top of every hour
    Hourly,
    /// Midnight UTC
    #[default]
    Daily,
    /// Sunday 00:00 UTC
    Weekly,
    /// First day of the month, 00:00 UTC
    Monthly,
}

impl ResetPeriod {
    /// Start of the window containing `at`.
    ///
    /// For [`ResetPeriod::None`] the window is unbounded, so `at` itself is returned.
    pub fn window_start(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        match self {
            ResetPeriod::None => at,
            ResetPeriod::Hourly => midnight(date) + Duration::hours(i64::from(at.hour())),
            ResetPeriod::Daily => midnight(date),
            ResetPeriod::Weekly => {
                let back = i64::from(date.weekday().num_days_from_sunday());
                midnight(date) - Duration::days(back)
            }
            ResetPeriod::Monthly => midnight(date) - Duration::days(i64::from(date.day0())),
        }
    }

    /// First reset boundary strictly after `anchor`, or `None` when the period never resets
    pub fn next_reset(self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.window_start(anchor);
        match self {
            ResetPeriod::None => None,
            ResetPeriod::Hourly => Some(start + Duration::hours(1)),
            ResetPeriod::Daily => Some(start + Duration::days(1)),
            ResetPeriod::Weekly => Some(start + Duration::days(7)),
            ResetPeriod::Monthly => start.checked_add_months(Months::new(1)),
        }
    }

    /// Whether a window anchored at `anchor` has rolled over by `now`
    pub fn has_elapsed(self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_reset(anchor).is_some_and(|reset_at| now >= reset_at)
    }

    /// Lowercase name as used in config files and the admin API
    pub fn as_str(self) -> &'static str {
        match self {
            ResetPeriod::None => "none",
            ResetPeriod::Hourly => "hourly",
            ResetPeriod::Daily => "daily",
            ResetPeriod::Weekly => "weekly",
            ResetPeriod::Monthly => "monthly",
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

impl FromStr for ResetPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "never" => Ok(Self::None),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(format!("Invalid reset period: {}", s)),
        }
    }
}

impl std::fmt::Display for ResetPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
