//! Date alias rules
//!
//! Resolves logical date phrases ("last month", "this quarter") to concrete
//! inclusive date intervals relative to a reference date.

use crate::error::{PilotError, Result};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Week,
    Month,
    Quarter,
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum DateRule {
    /// Fixed inclusive interval
    Fixed { start: NaiveDate, end: NaiveDate },
    /// The trailing `days` days, including the reference date
    LastDays { days: u32 },
    /// The complete period before the one containing the reference date
    PreviousPeriod { period: Period },
    /// Start of the current period up to the reference date
    CurrentPeriod { period: Period },
}

impl DateRule {
    /// Structural check, independent of any reference date
    pub fn check(&self) -> std::result::Result<(), String> {
        match self {
            DateRule::Fixed { start, end } if start > end => {
                Err(format!("start {} is after end {}", start, end))
            }
            DateRule::LastDays { days: 0 } => Err("last_days requires at least one day".to_string()),
            _ => Ok(()),
        }
    }

    /// Resolve to an inclusive `(start, end)` interval
    pub fn resolve(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        match self {
            DateRule::Fixed { start, end } => Ok((*start, *end)),
            DateRule::LastDays { days } => {
                let back = days.saturating_sub(1) as u64;
                let start = today
                    .checked_sub_days(Days::new(back))
                    .ok_or_else(|| out_of_range(today))?;
                Ok((start, today))
            }
            DateRule::PreviousPeriod { period } => {
                let current_start = period_start(today, *period)?;
                let end = current_start.pred_opt().ok_or_else(|| out_of_range(today))?;
                Ok((period_start(end, *period)?, end))
            }
            DateRule::CurrentPeriod { period } => Ok((period_start(today, *period)?, today)),
        }
    }
}

fn period_start(date: NaiveDate, period: Period) -> Result<NaiveDate> {
    let start = match period {
        Period::Week => {
            let back = date.weekday().num_days_from_monday() as u64;
            date.checked_sub_days(Days::new(back))
        }
        Period::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1),
        Period::Quarter => {
            let first_month = ((date.month() - 1) / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), first_month, 1)
        }
        Period::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
    };
    start.ok_or_else(|| out_of_range(date))
}

fn out_of_range(date: NaiveDate) -> PilotError {
    PilotError::Validation(format!("date arithmetic out of range around {}", date))
}
