//! Five-field UNIX cron evaluation.
//!
//! The `cron` crate parses six/seven-field expressions and intersects
//! day-of-month with day-of-week. Standard UNIX semantics take the union of
//! the two fields when both are restricted, so `next_occurrence` evaluates
//! the expression once per restricted day field and keeps the earlier fire
//! time.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("unknown timezone: {0}")]
    InvalidTimezone(String),
}

/// Validate a five-field expression and a timezone name.
pub fn validate(expression: &str, timezone: &str) -> Result<(), ScheduleError> {
    parse_timezone(timezone)?;
    let fields = split_fields(expression)?;
    for variant in union_variants(&fields) {
        CronSchedule::from_str(&variant)
            .map_err(|e| ScheduleError::InvalidCron(format!("{expression}: {e}")))?;
    }
    Ok(())
}

/// Next fire time strictly after `after`, evaluated in the schedule's zone.
pub fn next_occurrence(
    expression: &str,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let tz = parse_timezone(timezone)?;
    let fields = split_fields(expression)?;
    let local_after = after.with_timezone(&tz);

    let mut next: Option<DateTime<Utc>> = None;
    for variant in union_variants(&fields) {
        let schedule = CronSchedule::from_str(&variant)
            .map_err(|e| ScheduleError::InvalidCron(format!("{expression}: {e}")))?;
        if let Some(fire) = schedule.after(&local_after).next() {
            let fire = fire.with_timezone(&Utc);
            next = Some(match next {
                Some(current) if current <= fire => current,
                _ => fire,
            });
        }
    }
    Ok(next)
}

fn parse_timezone(timezone: &str) -> Result<Tz, ScheduleError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))
}

fn split_fields(expression: &str) -> Result<Vec<String>, ScheduleError> {
    let fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
    if fields.len() != 5 {
        return Err(ScheduleError::InvalidCron(format!(
            "expected 5 fields, got {}",
            fields.len()
        )));
    }
    Ok(fields)
}

fn is_restricted(field: &str) -> bool {
    field != "*" && field != "?"
}

/// Six-field expressions (with a seconds field prepended) to evaluate. Two
/// variants when both day fields are restricted, one otherwise.
fn union_variants(fields: &[String]) -> Vec<String> {
    let dom = if fields[2] == "?" { "*" } else { &fields[2] };
    let dow = translate_dow(if fields[4] == "?" { "*" } else { &fields[4] });

    let build = |dom: &str, dow: &str| {
        format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], dom, fields[3], dow
        )
    };

    if is_restricted(dom) && is_restricted(&dow) {
        vec![build(dom, "*"), build("*", &dow)]
    } else {
        vec![build(dom, &dow)]
    }
}

/// UNIX numbers days of the week 0-6 (0 and 7 both Sunday); the `cron` crate
/// uses 1-7 with 1 = Sunday. Numeric tokens are shifted; names pass through.
fn translate_dow(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            let translated = if range == "*" {
                range.to_string()
            } else if let Some((start, end)) = range.split_once('-') {
                format!("{}-{}", translate_dow_value(start), translate_dow_value(end))
            } else {
                translate_dow_value(range)
            };
            match step {
                Some(step) => format!("{translated}/{step}"),
                None => translated,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_dow_value(value: &str) -> String {
    match value.parse::<u8>() {
        Ok(n) => ((n % 7) + 1).to_string(),
        Err(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn validates_field_count_and_syntax() {
        assert!(validate("0 3 * * *", "UTC").is_ok());
        assert!(validate("*/15 * * * 1-5", "UTC").is_ok());
        assert!(validate("0 3 * *", "UTC").is_err());
        assert!(validate("0 3 * * * *", "UTC").is_err());
        assert!(validate("61 3 * * *", "UTC").is_err());
        assert!(validate("0 3 * * *", "Mars/Olympus").is_err());
    }

    #[test]
    fn daily_schedule_fires_next_day() {
        let next = next_occurrence("0 3 * * *", "UTC", utc(2026, 8, 1, 4, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 2, 3, 0));
    }

    #[test]
    fn step_and_range_fields() {
        let next = next_occurrence("*/15 9-17 * * *", "UTC", utc(2026, 8, 3, 9, 16))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 3, 9, 30));
    }

    #[test]
    fn dom_dow_union_takes_the_earlier_fire() {
        // 2026-08-01 is a Saturday. "At 00:00 on the 15th or on Monday":
        // union semantics fire on Monday the 3rd, not on the 15th.
        let next = next_occurrence("0 0 15 * 1", "UTC", utc(2026, 8, 1, 12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 3, 0, 0));

        // From the 14th, the 15th is the earlier of the two.
        let next = next_occurrence("0 0 15 * 1", "UTC", utc(2026, 8, 14, 12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 15, 0, 0));
    }

    #[test]
    fn day_of_week_uses_unix_numbering() {
        // 2026-08-02 is a Sunday; UNIX dow 0 means Sunday.
        let next = next_occurrence("0 0 * * 0", "UTC", utc(2026, 8, 1, 12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 2, 0, 0));

        // dow 1 means Monday, and 7 is Sunday again.
        let next = next_occurrence("0 0 * * 1", "UTC", utc(2026, 8, 1, 12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 3, 0, 0));
        let next = next_occurrence("0 0 * * 7", "UTC", utc(2026, 8, 1, 12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 2, 0, 0));
    }

    #[test]
    fn dow_ranges_and_lists_translate() {
        // Weekdays only: from Saturday noon the next fire is Monday.
        let next = next_occurrence("30 8 * * 1-5", "UTC", utc(2026, 8, 1, 12, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 3, 8, 30));
    }

    #[test]
    fn timezone_is_respected() {
        // 03:00 in New York (EDT, UTC-4) is 07:00 UTC.
        let next = next_occurrence("0 3 * * *", "America/New_York", utc(2026, 8, 1, 0, 0))
            .unwrap()
            .unwrap();
        assert_eq!(next, utc(2026, 8, 1, 7, 0));
    }

    #[test]
    fn occurrence_is_strictly_after() {
        let at = utc(2026, 8, 2, 3, 0);
        let next = next_occurrence("0 3 * * *", "UTC", at).unwrap().unwrap();
        assert_eq!(next, utc(2026, 8, 3, 3, 0));
    }
}
