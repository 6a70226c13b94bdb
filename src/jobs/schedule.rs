//! Five-field cron expressions on top of the `cron` crate.
//!
//! The `cron` crate wants a leading seconds field and numbers weekdays
//! 1-7 starting at Sunday. Standard crontab numbering (0-7, Sunday is 0
//! or 7) is translated before parsing.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ScheduleError;

/// A parsed five-field schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }
        let dow = translate_day_of_week(fields[4])?;
        let full = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], dow
        );
        let inner =
            cron::Schedule::from_str(&full).map_err(|e| ScheduleError::Parse(e.to_string()))?;
        Ok(Self { inner })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }

    /// Whether a fire time fell between `last_run` and `now`.
    ///
    /// Any number of missed fire times collapse into a single `true`.
    pub fn is_due(&self, last_run: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_after(last_run).is_some_and(|next| next < now)
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rewrite a crontab day-of-week field into the `cron` crate's numbering.
///
/// Named days pass through untouched. Numeric items (values, ranges,
/// steps) are expanded to an explicit day list.
fn translate_day_of_week(field: &str) -> Result<String, ScheduleError> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, parse_dow_number(step)?.max(1)),
            None => (item, 1),
        };
        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_dow_number(a)?, parse_dow_number(b)?)
        } else {
            let n = parse_dow_number(range)?;
            // `5/2` means "from 5 to the end of the week, every 2"
            if item.contains('/') { (n, 7) } else { (n, n) }
        };
        if start > end || end > 7 {
            return Err(ScheduleError::Parse(format!(
                "day-of-week range {start}-{end} out of bounds"
            )));
        }
        let mut day = start;
        while day <= end {
            days.insert(day % 7 + 1);
            day += step;
        }
    }

    Ok(days
        .into_iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_dow_number(s: &str) -> Result<u32, ScheduleError> {
    s.parse::<u32>()
        .map_err(|_| ScheduleError::Parse(format!("invalid day-of-week value {s:?}")))
}
