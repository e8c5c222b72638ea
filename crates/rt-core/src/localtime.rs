//! Date handling for dispatch fields.
//!
//! Dispatch sends dates as strings in a handful of layouts. Indicators
//! expose them as ISO 8601; a string that does not parse is passed
//! through untouched.

use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Timelike};
use serde_json::Value;

use crate::error::{Result, RtError};
use crate::value::truthy;

const LAYOUTS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a dispatch date string
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
}

/// ISO 8601 rendering of a naive date, microseconds only when present
pub fn format_iso(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// ISO rendering of a field value. Strings that are not dates come back as-is.
pub fn to_iso(value: &Value) -> String {
    match value {
        Value::String(s) => match DateTime::parse_from_rfc3339(s.trim()) {
            Ok(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            Err(_) => parse_datetime(s).map(|dt| format_iso(&dt)).unwrap_or_else(|| s.clone()),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Current local time with its UTC offset
pub fn now_iso() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Current local time without offset
pub fn now_naive_iso() -> String {
    Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Order two field values: as dates when both parse, otherwise as numbers
/// or strings of the same kind. Mixed kinds do not compare.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => match (parse_datetime(x), parse_datetime(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        _ => None,
    }
}

/// Seconds of the time-of-day component of `end - start`, when `end` is later
pub fn elapsed_seconds(start: &Value, end: &Value) -> Option<i64> {
    let start = parse_datetime(start.as_str()?)?;
    let end = parse_datetime(end.as_str()?)?;
    if end <= start {
        return None;
    }
    Some((end - start).num_seconds().rem_euclid(86_400))
}

/// `true` when `start` is a date later than `end`, or `end` is empty
pub fn started_after(start: &Value, end: &Value) -> Option<bool> {
    if !truthy(end) {
        return Some(true);
    }
    compare(start, end).map(|o| o == Ordering::Greater)
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| RtError::config(format!("Invalid reset time: {}", raw)))
}

/// Seconds from `now` until the next occurrence of the local time `reset_time`
pub fn seconds_until(reset_time: &str, now: NaiveDateTime) -> Result<u64> {
    let at = parse_time_of_day(reset_time.trim())?;
    let mut next = now.date().and_time(at);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    Ok((next - now).num_seconds().max(0) as u64)
}

/// Current local time, naive
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Filter stamp of the daily outbound view
pub fn daily_stamp(now: NaiveDateTime, from_midnight: bool) -> String {
    if from_midnight {
        let date: NaiveDate = now.date();
        date.format("%Y/%m/%d 00:00:00").to_string()
    } else {
        now.format("%Y/%m/%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(raw: &str) -> NaiveDateTime {
        parse_datetime(raw).unwrap()
    }

    #[test]
    fn test_dispatch_layouts() {
        assert_eq!(to_iso(&json!("2017/03/29 15:28:39")), "2017-03-29T15:28:39");
        assert_eq!(to_iso(&json!("2017-03-29 15:28:39.250")), "2017-03-29T15:28:39.250000");
        assert_eq!(to_iso(&json!("not a date")), "not a date");
        assert_eq!(to_iso(&json!(12)), "12");
    }

    #[test]
    fn test_compare_dates() {
        let a = json!("2017/03/29 15:28:39");
        let b = json!("2017-03-29T15:30:00");
        assert_eq!(compare(&a, &b), Some(Ordering::Less));
        assert_eq!(compare(&a, &json!(0)), None);
        assert_eq!(started_after(&a, &json!("")), Some(true));
    }

    #[test]
    fn test_elapsed_seconds() {
        let start = json!("2017/03/29 15:28:39");
        let end = json!("2017/03/29 15:30:00");
        assert_eq!(elapsed_seconds(&start, &end), Some(81));
        assert_eq!(elapsed_seconds(&end, &start), None);
    }

    #[test]
    fn test_seconds_until_reset() {
        let now = at("2017/03/29 23:00:00");
        assert_eq!(seconds_until("23:30", now).unwrap(), 1800);
        assert_eq!(seconds_until("22:00:00", now).unwrap(), 23 * 3600);
        assert!(seconds_until("25h", now).is_err());
    }

    #[test]
    fn test_daily_stamp() {
        let now = at("2017/03/29 10:11:12");
        assert_eq!(daily_stamp(now, true), "2017/03/29 00:00:00");
        assert_eq!(daily_stamp(now, false), "2017/03/29 10:11:12");
    }
}
