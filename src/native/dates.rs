//! Date and flag literals of the wire format.
//!
//! An unset date is written as the literal `UNSET_DATE` and only that exact
//! literal reads back as unset. `1970-01-01` or `1970-01-01 00:00:00` are
//! real dates.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

use super::error::CodecError;

pub const UNSET_DATE: &str = "1970-01-01 00:00";

const DATETIME_LAYOUT: &str = "%Y-%m-%d %H:%M";
const DATE_LAYOUT: &str = "%Y-%m-%d";

static DATE_SHAPE: OnceLock<Regex> = OnceLock::new();

fn date_shape() -> &'static Regex {
    DATE_SHAPE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2})(?: (\d{2}:\d{2})(?::(\d{2}))?)?$")
            .expect("date pattern is valid")
    })
}

pub fn format_datetime(value: Option<NaiveDateTime>) -> String {
    match value {
        Some(v) => v.format(DATETIME_LAYOUT).to_string(),
        None => UNSET_DATE.to_string(),
    }
}

pub fn format_date(value: Option<NaiveDate>) -> String {
    match value {
        Some(v) => v.format(DATE_LAYOUT).to_string(),
        None => UNSET_DATE.to_string(),
    }
}

/// Reads a timestamp attribute. Empty and the unset literal give `None`;
/// a date without a time is midnight.
pub fn parse_datetime(field: &str, raw: &str) -> Result<Option<NaiveDateTime>, CodecError> {
    if raw.is_empty() || raw == UNSET_DATE {
        return Ok(None);
    }
    let caps = date_shape()
        .captures(raw)
        .ok_or_else(|| bad_date(field, raw))?;
    let date = NaiveDate::parse_from_str(&caps[1], DATE_LAYOUT).map_err(|_| bad_date(field, raw))?;
    let time = match (caps.get(2), caps.get(3)) {
        (Some(hm), Some(s)) => format!("{}:{}", hm.as_str(), s.as_str()),
        (Some(hm), None) => format!("{}:00", hm.as_str()),
        _ => "00:00:00".to_string(),
    };
    let time = chrono::NaiveTime::parse_from_str(&time, "%H:%M:%S").map_err(|_| bad_date(field, raw))?;
    Ok(Some(date.and_time(time)))
}

/// Reads a day attribute. A timestamp literal keeps only its date.
pub fn parse_date(field: &str, raw: &str) -> Result<Option<NaiveDate>, CodecError> {
    Ok(parse_datetime(field, raw)?.map(|dt| dt.date()))
}

fn bad_date(field: &str, raw: &str) -> CodecError {
    CodecError::malformed(format!("attribute `{}` has an unreadable date `{}`", field, raw))
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub fn parse_bool(raw: &str) -> bool {
    matches!(raw, "true" | "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn unset_renders_as_sentinel() {
        assert_eq!(format_datetime(None), "1970-01-01 00:00");
        assert_eq!(format_date(None), "1970-01-01 00:00");
        assert_eq!(format_datetime(Some(at(2020, 3, 9, 14, 5))), "2020-03-09 14:05");
        assert_eq!(
            format_date(NaiveDate::from_ymd_opt(2020, 3, 9)),
            "2020-03-09"
        );
    }

    #[test]
    fn only_the_exact_sentinel_is_unset() {
        assert_eq!(parse_datetime("date_completed", UNSET_DATE).unwrap(), None);
        assert_eq!(parse_datetime("date_completed", "").unwrap(), None);
        assert_eq!(
            parse_datetime("date_completed", "1970-01-01 00:00:00").unwrap(),
            Some(at(1970, 1, 1, 0, 0))
        );
        assert_eq!(
            parse_datetime("date_completed", "1970-01-01").unwrap(),
            Some(at(1970, 1, 1, 0, 0))
        );
    }

    #[test]
    fn parses_both_layouts() {
        assert_eq!(
            parse_datetime("date_assigned", "2021-11-30 08:45").unwrap(),
            Some(at(2021, 11, 30, 8, 45))
        );
        assert_eq!(
            parse_date("date_due", "2021-11-30 08:45").unwrap(),
            NaiveDate::from_ymd_opt(2021, 11, 30)
        );
        assert_eq!(parse_date("date_due", UNSET_DATE).unwrap(), None);
    }

    #[test]
    fn rejects_other_shapes() {
        for raw in ["yesterday", "2021-13-01", "2021-02-30 10:00", "2021-01-01T10:00", "2021-01-01 25:00"] {
            assert!(parse_datetime("date_due", raw).is_err(), "{} should fail", raw);
        }
    }

    #[test]
    fn flags() {
        assert_eq!(format_bool(true), "true");
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("TRUE"));
    }
}
