//! Date, datetime and time conversions.
//!
//! A plain number given as a date or datetime counts days since the Unix epoch.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone};

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

fn epoch() -> NaiveDateTime {
    DateTime::UNIX_EPOCH.naive_utc()
}

fn days(value: &str) -> Option<f64> {
    let n: f64 = value.parse().ok()?;
    n.is_finite().then_some(n)
}

fn from_days(days: f64) -> Option<NaiveDateTime> {
    let millis = (days * 86_400_000.0).round() as i64;
    epoch().checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

/// Canonical `YYYY-MM-DD`, zero-padded. Any time part is dropped. Empty if not a date.
pub fn convert_date(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    if let Some(d) = days(value) {
        return from_days(d.floor())
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
    }
    let date_part = value.split('T').next().unwrap_or(value);
    let mut parts = date_part.splitn(3, '-').map(|p| p.trim().parse::<u32>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(y)), Some(Ok(m)), Some(Ok(d))) => i32::try_from(y)
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, m, d))
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

pub fn is_valid_date(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Canonical datetime in local time with a millisecond fraction and the local offset,
/// e.g. `2024-03-05T07:08:09.000+01:00`. Empty if not a date or datetime.
pub fn convert_datetime(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    parse_local_datetime(value)
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_local_datetime(value: &str) -> Option<DateTime<Local>> {
    if let Some(d) = days(value) {
        let utc = from_days(d)?.and_utc();
        return Some(utc.with_timezone(&Local));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Local));
    }
    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            let date = convert_date(value);
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Local.from_local_datetime(&naive).earliest()
}

/// Canonical `HH:MM:SS.sss` followed by the original offset, if any. Empty if invalid.
pub fn convert_time(value: &str) -> String {
    let value = value.trim();
    let (clock, offset) = split_offset(value);
    let mut parts = clock.split(':');
    let hours = parts.next().and_then(|h| h.parse::<u32>().ok());
    let minutes = parts.next().and_then(|m| m.parse::<u32>().ok());
    let seconds = match parts.next() {
        Some(s) => s.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0),
        None => Some(0.0),
    };
    match (hours, minutes, seconds, parts.next()) {
        (Some(h), Some(m), Some(s), None) if h < 24 && m < 60 && s < 60.0 => {
            let millis = (s * 1000.0).round() as u32;
            format!(
                "{:02}:{:02}:{:02}.{:03}{}",
                h,
                m,
                (millis / 1000).min(59),
                millis % 1000,
                offset
            )
        }
        _ => String::new(),
    }
}

pub fn is_valid_time(value: &str) -> bool {
    !convert_time(value).is_empty()
}

fn split_offset(value: &str) -> (&str, &str) {
    match value.char_indices().find(|&(i, c)| c == 'Z' || ((c == '+' || c == '-') && i > 0)) {
        Some((i, _)) => (&value[..i], &value[i..]),
        None => (value, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_date() {
        assert_eq!(convert_date("2024-3-5"), "2024-03-05");
        assert_eq!(convert_date("2024-03-05T10:11:12.000+02:00"), "2024-03-05");
        assert_eq!(convert_date("0"), "1970-01-01");
        assert_eq!(convert_date("18262"), "2020-01-01");
        assert_eq!(convert_date("2023-02-30"), "");
        assert_eq!(convert_date("soon"), "");
        assert_eq!(convert_date(""), "");
    }

    #[test]
    fn test_validate_date() {
        assert!(is_valid_date("2024-02-29"));
        assert!(!is_valid_date("2023-02-29"));
        assert!(!is_valid_date("2024-2-29"));
    }

    #[test]
    fn test_convert_datetime_shape() {
        let converted = convert_datetime("2024-03-05T07:08:09Z");
        // local offset varies by machine; the layout does not
        assert_eq!(converted.len(), "2024-03-05T07:08:09.000+00:00".len());
        assert_eq!(&converted[19..23], ".000");
        let local = convert_datetime("2024-03-05T07:08:09");
        assert!(local.starts_with("2024-03-05T07:08:09.000"));
        let midnight = convert_datetime("2024-03-05");
        assert!(midnight.starts_with("2024-03-05T00:00:00.000"));
        assert_eq!(convert_datetime("never"), "");
    }

    #[test]
    fn test_convert_time() {
        assert_eq!(convert_time("7:8"), "07:08:00.000");
        assert_eq!(convert_time("07:08:09.5"), "07:08:09.500");
        assert_eq!(convert_time("07:08:09+02:00"), "07:08:09.000+02:00");
        assert_eq!(convert_time("23:59:59Z"), "23:59:59.000Z");
        assert_eq!(convert_time("24:00"), "");
        assert_eq!(convert_time("noon"), "");
        assert!(is_valid_time("12:30:00.000-05:00"));
        assert!(!is_valid_time("12:60"));
    }
}
