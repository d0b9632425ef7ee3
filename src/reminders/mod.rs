//! Reminder model and recurrence rollover.
//!
//! All instants are carried as `DateTime<Tz>` in the single configured
//! zone, so a stored `run_date` is never naive once it leaves this module.

use chrono::{DateTime, Datelike, Months, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::SkipReason;

mod record;
pub mod store;

pub use record::{StoredReminder, RUN_DATE_FORMAT};
pub use store::{ReminderStore, StoreState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    None,
    Annual,
}

impl Recurrence {
    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Annual => "annual",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = SkipReason;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "none" | "once" | "nenhuma" | "nenhum" => Ok(Recurrence::None),
            "annual" | "yearly" | "anual" => Ok(Recurrence::Annual),
            other => Err(SkipReason::InvalidRecurrence(other.to_string())),
        }
    }
}

/// An unvalidated reminder as produced by extraction, already carrying a
/// zoned timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub subject: String,
    pub when: DateTime<Tz>,
    pub recurrence: Recurrence,
}

impl Candidate {
    pub fn new(subject: impl Into<String>, when: DateTime<Tz>, recurrence: Recurrence) -> Self {
        Self {
            subject: subject.into(),
            when,
            recurrence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub subject: String,
    pub scheduled_at: DateTime<Tz>,
    pub recurrence: Recurrence,
}

impl Reminder {
    /// Text handed to the deliverer when the timer fires.
    pub fn message(&self) -> String {
        match self.recurrence {
            Recurrence::None => self.subject.clone(),
            Recurrence::Annual => format!("Anniversary of {} 🎂", self.subject),
        }
    }

    /// The occurrence after `scheduled_at`, or `None` for one-shot reminders.
    pub fn next_occurrence(&self) -> Option<DateTime<Tz>> {
        match self.recurrence {
            Recurrence::None => None,
            Recurrence::Annual => add_years(&self.scheduled_at, 1),
        }
    }

    pub fn with_scheduled_at(&self, scheduled_at: DateTime<Tz>) -> Self {
        Self {
            subject: self.subject.clone(),
            scheduled_at,
            recurrence: self.recurrence,
        }
    }

    pub fn to_record(&self) -> StoredReminder {
        StoredReminder {
            subject: self.subject.clone(),
            run_date: format_run_date(&self.scheduled_at),
            recurrence: self.recurrence.as_str().to_string(),
        }
    }

    pub fn from_record(record: &StoredReminder, tz: Tz) -> Result<Self, SkipReason> {
        let subject = record.subject.trim();
        if subject.is_empty() {
            return Err(SkipReason::EmptySubject);
        }
        let recurrence = record.recurrence.parse::<Recurrence>()?;
        let scheduled_at = parse_run_date(&record.run_date, tz)?;
        Ok(Self {
            subject: subject.to_string(),
            scheduled_at,
            recurrence,
        })
    }
}

/// Entry returned by pending listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReminder {
    pub when: DateTime<Tz>,
    pub subject: String,
    pub recurrence: Recurrence,
}

/// Turns a candidate into a schedulable reminder, or says why it was dropped.
///
/// Annual candidates at or before `now` move forward whole years until they
/// are strictly in the future. Anything still at or before `now` afterwards
/// is past due; ties never fire immediately.
pub fn resolve(candidate: Candidate, now: DateTime<Tz>) -> Result<Reminder, SkipReason> {
    let subject = candidate.subject.trim();
    if subject.is_empty() {
        return Err(SkipReason::EmptySubject);
    }

    let mut scheduled_at = truncate_to_seconds(candidate.when);
    if candidate.recurrence == Recurrence::Annual && scheduled_at <= now {
        let behind = now.year() - scheduled_at.year() - 1;
        if behind > 0 {
            scheduled_at = shift_years(&scheduled_at, behind as u32)?;
        }
        while scheduled_at <= now {
            scheduled_at = shift_years(&scheduled_at, 1)?;
        }
    }

    if scheduled_at <= now {
        return Err(SkipReason::PastDue(format_run_date(&scheduled_at)));
    }

    Ok(Reminder {
        subject: subject.to_string(),
        scheduled_at,
        recurrence: candidate.recurrence,
    })
}

/// Same month, day and wall-clock time `years` later. 29 February lands on
/// 28 February in common years.
pub fn add_years(at: &DateTime<Tz>, years: u32) -> Option<DateTime<Tz>> {
    let naive = at
        .naive_local()
        .checked_add_months(Months::new(years.checked_mul(12)?))?;
    localize(at.timezone(), naive)
}

fn shift_years(at: &DateTime<Tz>, years: u32) -> Result<DateTime<Tz>, SkipReason> {
    add_years(at, years).ok_or_else(|| SkipReason::NonexistentLocalTime(format_run_date(at)))
}

/// Interprets a wall-clock time in `tz`. Ambiguous times take the earlier
/// instant; times inside a DST gap move forward by the gap.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive).earliest().or_else(|| {
        let shifted = naive.checked_add_signed(TimeDelta::hours(1))?;
        tz.from_local_datetime(&shifted).earliest()
    })
}

pub fn parse_run_date(raw: &str, tz: Tz) -> Result<DateTime<Tz>, SkipReason> {
    let raw = raw.trim();
    let naive = NaiveDateTime::parse_from_str(raw, RUN_DATE_FORMAT)
        .map_err(|_| SkipReason::InvalidTimestamp(raw.to_string()))?;
    localize(tz, naive).ok_or_else(|| SkipReason::NonexistentLocalTime(raw.to_string()))
}

pub fn format_run_date(at: &DateTime<Tz>) -> String {
    at.format(RUN_DATE_FORMAT).to_string()
}

fn truncate_to_seconds(at: DateTime<Tz>) -> DateTime<Tz> {
    at.with_nanosecond(0).unwrap_or(at)
}
