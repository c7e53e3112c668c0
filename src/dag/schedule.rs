// src/dag/schedule.rs

use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Fires once a month at `day_of_month` `hour`:`minute` UTC (cron `M H D * *`).
///
/// Months without that day (e.g. the 31st in April) are skipped, as cron does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlySchedule {
    pub day_of_month: u32,
    pub hour: u32,
    pub minute: u32,
}

impl Default for MonthlySchedule {
    fn default() -> Self {
        Self {
            day_of_month: 2,
            hour: 6,
            minute: 0,
        }
    }
}

impl MonthlySchedule {
    pub fn validate(&self) -> Result<()> {
        if !(1..=31).contains(&self.day_of_month) {
            bail!("schedule day_of_month must be 1-31, got {}", self.day_of_month);
        }
        if self.hour > 23 || self.minute > 59 {
            bail!("schedule time {:02}:{:02} is not a valid time of day", self.hour, self.minute);
        }
        Ok(())
    }

    pub fn cron(&self) -> String {
        format!("{} {} {} * *", self.minute, self.hour, self.day_of_month)
    }

    fn fire_in_month(&self, year: i32, month: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(year, month, self.day_of_month)?.and_hms_opt(self.hour, self.minute, 0)
    }

    /// First fire time strictly after `t`.
    pub fn next_after(&self, t: NaiveDateTime) -> Option<NaiveDateTime> {
        let (mut year, mut month) = (t.year(), t.month());
        // every valid day occurs at least once a year
        for _ in 0..=12 {
            if let Some(fire) = self.fire_in_month(year, month) {
                if fire > t {
                    return Some(fire);
                }
            }
            if month == 12 {
                year += 1;
                month = 1;
            } else {
                month += 1;
            }
        }
        None
    }

    /// Logical dates of every run whose interval has closed by `now`, oldest first.
    ///
    /// A run for logical date `L` becomes due at the following fire time, so
    /// the newest fire time is never itself a due logical date.
    pub fn due_runs(&self, start: NaiveDateTime, now: NaiveDateTime) -> Vec<NaiveDateTime> {
        let mut runs = Vec::new();
        let Some(mut logical) = self.next_after(start - TimeDelta::seconds(1)) else {
            return runs;
        };
        while let Some(due_at) = self.next_after(logical) {
            if due_at > now {
                break;
            }
            runs.push(logical);
            logical = due_at;
        }
        runs
    }
}
