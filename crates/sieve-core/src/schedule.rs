//! Next-run computation for recurring jobs.
//!
//! All times are UTC. A computed run is always strictly after the reference
//! instant, so a job whose slot is "now" moves to the following period.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};

use crate::error::AppError;
use crate::job::Frequency;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRule {
    /// Every hour at `minute` past.
    Hourly { minute: u32 },
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
    /// `day` is clamped to the last day of shorter months.
    Monthly { day: u32, at: NaiveTime },
}

impl ScheduleRule {
    /// Build a rule from a job's frequency fields.
    ///
    /// Weekly jobs without a weekday run on Monday; monthly jobs without a
    /// day run on the 1st.
    pub fn new(
        frequency: Frequency,
        at: NaiveTime,
        day_of_week: Option<u32>,
        day_of_month: Option<u32>,
    ) -> Result<Self, AppError> {
        let at = at.with_nanosecond(0).unwrap_or(at);
        match frequency {
            Frequency::Hourly => Ok(ScheduleRule::Hourly {
                minute: at.minute(),
            }),
            Frequency::Daily => Ok(ScheduleRule::Daily { at }),
            Frequency::Weekly => {
                let index = day_of_week.unwrap_or(0);
                let weekday = WEEKDAYS.get(index as usize).copied().ok_or_else(|| {
                    AppError::InvalidRequest(format!(
                        "day_of_week must be 0 (Monday) to 6 (Sunday), got {index}"
                    ))
                })?;
                Ok(ScheduleRule::Weekly { weekday, at })
            }
            Frequency::Monthly => {
                let day = day_of_month.unwrap_or(1);
                if !(1..=31).contains(&day) {
                    return Err(AppError::InvalidRequest(format!(
                        "day_of_month must be between 1 and 31, got {day}"
                    )));
                }
                Ok(ScheduleRule::Monthly { day, at })
            }
        }
    }

    /// First run strictly after `now`.
    ///
    /// Returns `None` only when the result falls outside chrono's range.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.date_naive();
        match *self {
            ScheduleRule::Hourly { minute } => {
                let candidate = today.and_hms_opt(now.hour(), minute, 0)?.and_utc();
                if candidate > now {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::hours(1))
                }
            }
            ScheduleRule::Daily { at } => {
                let candidate = today.and_time(at).and_utc();
                if candidate > now {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(1))
                }
            }
            ScheduleRule::Weekly { weekday, at } => {
                let ahead = (7 + weekday.num_days_from_monday()
                    - now.weekday().num_days_from_monday())
                    % 7;
                let candidate = today
                    .checked_add_signed(Duration::days(i64::from(ahead)))?
                    .and_time(at)
                    .and_utc();
                if candidate > now {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::weeks(1))
                }
            }
            ScheduleRule::Monthly { day, at } => {
                let candidate = monthly_slot(today.year(), today.month(), day, at)?;
                if candidate > now {
                    return Some(candidate);
                }
                let (year, month) = if today.month() == 12 {
                    (today.year() + 1, 1)
                } else {
                    (today.year(), today.month() + 1)
                };
                monthly_slot(year, month, day, at)
            }
        }
    }
}

impl fmt::Display for ScheduleRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleRule::Hourly { minute } => write!(f, "hourly at :{minute:02}"),
            ScheduleRule::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            ScheduleRule::Weekly { weekday, at } => {
                write!(f, "weekly on {weekday} at {}", at.format("%H:%M"))
            }
            ScheduleRule::Monthly { day, at } => {
                write!(f, "monthly on day {day} at {}", at.format("%H:%M"))
            }
        }
    }
}

fn monthly_slot(year: i32, month: u32, day: u32, at: NaiveTime) -> Option<DateTime<Utc>> {
    let day = day.min(days_in_month(year, month)?);
    Some(NaiveDate::from_ymd_opt(year, month, day)?.and_time(at).and_utc())
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    Some(
        NaiveDate::from_ymd_opt(next_year, next_month, 1)?
            .pred_opt()?
            .day(),
    )
}
