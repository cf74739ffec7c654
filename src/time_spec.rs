//! Wall-clock helpers shared by the scheduler, store and control surface.
//!
//! Everything inside the engine is a `DateTime<Utc>`. Local time only
//! appears at the edges: the `"YYYY-MM-DD HH:MM:SS"` control-surface format,
//! calendar events and rows read back from the store.

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{AlarmError, Result};

/// Fixed-format local timestamp accepted by the control surface.
pub const TIME_SPEC_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Display timezone used when none is configured.
pub const DEFAULT_TIMEZONE: &str = "America/Denver";

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| AlarmError::InvalidTime(format!("unknown timezone `{name}`: {e}")))
}

/// Resolve a naive local timestamp in `tz` to an absolute instant.
///
/// Ambiguous local times (DST fall-back) take the earlier instant. Local
/// times that do not exist (DST spring-forward gap) move forward one hour.
#[must_use]
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return dt.with_timezone(&Utc);
    }
    let shifted = local + TimeDelta::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Convert an instant to naive wall-clock time in `tz`.
#[must_use]
pub fn to_local(tz: Tz, instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&tz).naive_local()
}

/// Parse a `"YYYY-MM-DD HH:MM:SS"` string interpreted in `tz`.
pub fn parse_time_spec(spec: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let local = NaiveDateTime::parse_from_str(spec.trim(), TIME_SPEC_FORMAT)
        .map_err(|e| AlarmError::InvalidTime(format!("`{spec}`: {e}")))?;
    Ok(resolve_local(tz, local))
}

/// Format an instant as a `"YYYY-MM-DD HH:MM:SS"` string in `tz`.
#[must_use]
pub fn format_time_spec(instant: DateTime<Utc>, tz: Tz) -> String {
    to_local(tz, instant).format(TIME_SPEC_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, 0))
            .expect("valid naive datetime")
    }

    #[test]
    fn parse_time_spec_applies_zone_offset() {
        let tz = parse_timezone("America/Phoenix").unwrap();
        let at = parse_time_spec("2024-03-10 09:00:00", tz).unwrap();
        assert_eq!(at, Utc.from_utc_datetime(&naive(2024, 3, 10, 16, 0)));
    }

    #[test]
    fn format_inverts_parse() {
        let tz = parse_timezone(DEFAULT_TIMEZONE).unwrap();
        let at = parse_time_spec("2024-11-20 06:30:00", tz).unwrap();
        assert_eq!(format_time_spec(at, tz), "2024-11-20 06:30:00");
    }

    #[test]
    fn malformed_time_spec_is_rejected() {
        let tz = parse_timezone("UTC").unwrap();
        for bad in ["", "tomorrow", "2024-13-01 00:00:00", "2024-03-10T09:00:00"] {
            assert!(
                matches!(parse_time_spec(bad, tz), Err(AlarmError::InvalidTime(_))),
                "`{bad}` should be rejected"
            );
        }
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn spring_forward_gap_moves_one_hour_later() {
        let tz = parse_timezone("America/Denver").unwrap();
        // 02:30 does not exist on 2024-03-10 in Denver.
        let at = resolve_local(tz, naive(2024, 3, 10, 2, 30));
        assert_eq!(to_local(tz, at), naive(2024, 3, 10, 3, 30));
    }

    #[test]
    fn fall_back_overlap_takes_earlier_instant() {
        let tz = parse_timezone("America/Denver").unwrap();
        let at = resolve_local(tz, naive(2024, 11, 3, 1, 30));
        // MDT (UTC-6) is the earlier of the two 01:30s.
        assert_eq!(at, Utc.from_utc_datetime(&naive(2024, 11, 3, 7, 30)));
    }
}
