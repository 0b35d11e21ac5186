//! Five-field calendar expressions
//!
//! Jobs use the classic `minute hour day-of-month month day-of-week` form
//! with Sunday as 0 (or 7). The `cron` crate wants a leading seconds field
//! and numbers Sunday as 1, so expressions are rewritten before parsing.
//!
//! When both day-of-month and day-of-week are restricted, a day matching
//! either one fires. The `cron` crate would require both, so that case is
//! kept as two schedules and the earlier candidate wins.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::{Error, Result};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed five-field expression
#[derive(Debug, Clone)]
pub struct Calendar {
    schedules: Vec<cron::Schedule>,
}

impl Calendar {
    /// First matching instant strictly after `after`
    pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(after).next())
            .min()
    }
}

/// Parse a five-field expression
pub fn parse(expr: &str) -> Result<Calendar> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::Schedule(format!(
            "expected 5 fields (minute hour day-of-month month day-of-week), got {} in '{}'",
            fields.len(),
            expr
        )));
    }
    let (minute, hour, day_of_month, month) = (fields[0], fields[1], fields[2], fields[3]);

    let day_of_week = translate_day_of_week(fields[4])
        .map_err(|e| Error::Schedule(format!("invalid day-of-week in '{}': {}", expr, e)))?;
    let build = |dom: &str, dow: &str| {
        cron::Schedule::from_str(&format!("0 {} {} {} {} {}", minute, hour, dom, month, dow))
            .map_err(|e| Error::Schedule(format!("invalid cron expression '{}': {}", expr, e)))
    };

    let schedules = if is_restricted(day_of_month) && is_restricted(fields[4]) {
        vec![build(day_of_month, "*")?, build("*", &day_of_week)?]
    } else {
        vec![build(day_of_month, &day_of_week)?]
    };
    Ok(Calendar { schedules })
}

/// Day fields starting with `*` count as unrestricted, `*/2` included
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

/// Check a timezone name
pub fn parse_tz(tz: &str) -> Result<chrono_tz::Tz> {
    tz.parse::<chrono_tz::Tz>()
        .map_err(|_| Error::Schedule(format!("unknown timezone '{}'", tz)))
}

/// Next matching instant strictly after `now_ms`, in epoch milliseconds
pub fn next_after(expr: &str, tz: Option<&str>, now_ms: i64) -> Option<i64> {
    let calendar = match parse(expr) {
        Ok(calendar) => calendar,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };
    let now = DateTime::<Utc>::from_timestamp_millis(now_ms)?;

    if let Some(tz_str) = tz {
        match parse_tz(tz_str) {
            Ok(tz) => {
                return calendar
                    .next_after(&now.with_timezone(&tz))
                    .map(|next| next.timestamp_millis());
            }
            Err(_) => warn!("Invalid timezone '{}', falling back to UTC", tz_str),
        }
    }

    calendar.next_after(&now).map(|next| next.timestamp_millis())
}

/// Rewrite a day-of-week field from 0..=7 (Sunday 0 or 7) to 1..=7 (Sunday 1)
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step '{}'", step))?;
                if step == 0 {
                    return Err("step must be positive".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (day_number(a)?, day_number(b)?),
                None => {
                    let day = day_number(range)?;
                    // "5/2" means from 5 to the end of the week
                    if step > 1 {
                        (day, 6)
                    } else {
                        (day, day)
                    }
                }
            },
        };
        if start > end {
            return Err(format!("range '{}' runs backwards", range));
        }

        let mut day = start;
        while day <= end {
            days.insert(day % 7);
            day += step;
        }
    }

    if days.is_empty() {
        return Err("no days selected".to_string());
    }
    Ok(days
        .iter()
        .map(|d| (d + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn day_number(token: &str) -> std::result::Result<u32, String> {
    let upper = token.to_ascii_uppercase();
    if let Some(pos) = DAY_NAMES.iter().position(|name| *name == upper) {
        return Ok(pos as u32);
    }
    match token.parse::<u32>() {
        Ok(n) if n <= 7 => Ok(n),
        _ => Err(format!("'{}' is not a day of week", token)),
    }
}
