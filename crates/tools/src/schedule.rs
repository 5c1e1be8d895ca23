//! Preview of upcoming fire times for tool schedules.
//!
//! Tools carry classic five-field crontab expressions
//! (`minute hour day-of-month month day-of-week`, Sunday = 0 or 7).  The
//! `cron` crate expects a leading seconds field and numbers weekdays from
//! Sunday = 1, so expressions are normalised before parsing: a `0` seconds
//! field is prepended and numeric weekdays are rewritten as names.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("cron expression `{expr}` has {fields} fields; expected 5, 6 or 7")]
    FieldCount { expr: String, fields: usize },
    #[error("invalid cron expression `{expr}`: {reason}")]
    Invalid { expr: String, reason: String },
}

/// The next `count` fire times of `expr` strictly after `after`.
pub fn next_runs(
    expr: &str,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
    let normalized = normalize(expr)?;
    let schedule = Schedule::from_str(&normalized).map_err(|e| ScheduleError::Invalid {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;
    Ok(schedule.after(&after).take(count).collect())
}

/// Rewrite a crontab expression into the dialect the `cron` crate parses.
/// Six- and seven-field expressions already carry seconds and pass through.
pub fn normalize(expr: &str) -> Result<String, ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = normalize_weekdays(fields[4]);
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], dow
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ScheduleError::FieldCount {
            expr: expr.to_string(),
            fields: n,
        }),
    }
}

/// Expand numeric weekday items (`0`, `1-5`, `1-5/2`, `3/2`) into name lists.
/// Wildcards and named items are left untouched.
fn normalize_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| expand_weekday_item(item).unwrap_or_else(|| item.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

fn expand_weekday_item(item: &str) -> Option<String> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, step.parse::<usize>().ok()?),
        None => (item, 1),
    };
    if base == "*" || step == 0 {
        return None;
    }
    let (start, end) = match base.split_once('-') {
        Some((a, b)) => (weekday_number(a)?, weekday_number(b)?),
        None if item.contains('/') => (weekday_number(base)?, 6),
        None => {
            let day = weekday_number(base)?;
            (day, day)
        }
    };
    // A range ending in 7 means "through Sunday".
    let days: Vec<usize> = if end == 7 {
        (start..=6).chain(std::iter::once(0)).collect()
    } else if start <= end {
        (start..=end).collect()
    } else {
        return None;
    };
    let names: Vec<&str> = days
        .into_iter()
        .step_by(step)
        .map(|d| WEEKDAYS[d % 7])
        .collect();
    Some(names.join(","))
}

fn weekday_number(token: &str) -> Option<usize> {
    let n: usize = token.parse().ok()?;
    (n <= 7).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn five_field_expressions_gain_seconds() {
        assert_eq!(normalize("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize("0 2 * * *").unwrap(), "0 0 2 * * *");
    }

    #[test]
    fn numeric_weekdays_become_names() {
        assert_eq!(normalize("0 4 * * 0").unwrap(), "0 0 4 * * SUN");
        assert_eq!(normalize("0 4 * * 7").unwrap(), "0 0 4 * * SUN");
        assert_eq!(normalize("0 9 * * 1-5").unwrap(), "0 0 9 * * MON,TUE,WED,THU,FRI");
        assert_eq!(normalize("0 9 * * 1-5/2").unwrap(), "0 0 9 * * MON,WED,FRI");
        assert_eq!(normalize("0 9 * * 5-7").unwrap(), "0 0 9 * * FRI,SAT,SUN");
        assert_eq!(normalize("0 9 * * 1,3").unwrap(), "0 0 9 * * MON,WED");
        assert_eq!(normalize("0 9 * * MON").unwrap(), "0 0 9 * * MON");
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert_eq!(normalize("30 0 * * * *").unwrap(), "30 0 * * * *");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        let err = normalize("* * *").unwrap_err();
        assert_eq!(
            err,
            ScheduleError::FieldCount {
                expr: "* * *".to_string(),
                fields: 3
            }
        );
    }

    #[test]
    fn every_five_minutes() {
        let runs = next_runs("*/5 * * * *", at(2026, 1, 1, 0, 0, 30), 3).unwrap();
        assert_eq!(
            runs,
            vec![
                at(2026, 1, 1, 0, 5, 0),
                at(2026, 1, 1, 0, 10, 0),
                at(2026, 1, 1, 0, 15, 0)
            ]
        );
    }

    #[test]
    fn weekly_sunday_job() {
        // 2026-01-01 is a Thursday.
        let runs = next_runs("0 4 * * 0", at(2026, 1, 1, 12, 0, 0), 2).unwrap();
        assert_eq!(runs, vec![at(2026, 1, 4, 4, 0, 0), at(2026, 1, 11, 4, 0, 0)]);
    }

    #[test]
    fn garbage_is_an_invalid_expression() {
        let err = next_runs("every day at noon", Utc::now(), 1).unwrap_err();
        assert!(matches!(err, ScheduleError::FieldCount { fields: 4, .. }));
        let err = next_runs("99 * * * *", Utc::now(), 1).unwrap_err();
        assert!(matches!(err, ScheduleError::Invalid { .. }));
    }
}
