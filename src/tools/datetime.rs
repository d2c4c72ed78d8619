//! Date/time parsing for tool parameters.
//!
//! The model is asked for ISO-8601, but sometimes passes phrases like
//! "tomorrow at 6 PM" through unchanged.

use std::sync::LazyLock;

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};
use regex::Regex;

static TIME_12H: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2}):?(\d{2})?\s*(am|pm)").expect("valid regex")
});
static TIME_24H: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("valid regex"));
static HOUR_12H: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,2})\s*(am|pm)").expect("valid regex"));

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

/// Parse an absolute or simple relative date/time.
///
/// Naive and relative inputs are interpreted in `now`'s time zone. Relative
/// forms without a time default to 09:00.
pub fn parse_datetime<Tz: TimeZone>(input: &str, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return localize(now, ndt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return localize(now, date.and_time(NaiveTime::MIN));
    }

    parse_relative(&trimmed.to_lowercase(), now)
}

fn parse_relative<Tz: TimeZone>(input: &str, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let today = now.date_naive();

    let date = if input.contains("tomorrow") {
        today.succ_opt()?
    } else if input.contains("today") {
        today
    } else if input.contains("next week") {
        today.checked_add_signed(Duration::weeks(1))?
    } else {
        let (_, weekday) = WEEKDAYS
            .iter()
            .find(|(name, _)| input.contains(&format!("next {name}")))?;
        next_weekday(today, *weekday)
    };

    let time = extract_time(input).unwrap_or_else(nine_am);
    localize(now, date.and_time(time))
}

/// The first `weekday` strictly after `from`.
fn next_weekday(from: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() + 7 - from.weekday().num_days_from_monday()) % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    from + Duration::days(i64::from(ahead))
}

/// Pull a clock time out of free text: "6 PM", "2:30 pm", "18:00".
fn extract_time(input: &str) -> Option<NaiveTime> {
    if let Some(caps) = TIME_12H.captures(input) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        return NaiveTime::from_hms_opt(to_24h(hour, &caps[3]), minute, 0);
    }
    if let Some(caps) = TIME_24H.captures(input) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    if let Some(caps) = HOUR_12H.captures(input) {
        let hour: u32 = caps[1].parse().ok()?;
        return NaiveTime::from_hms_opt(to_24h(hour, &caps[2]), 0, 0);
    }
    None
}

fn to_24h(hour: u32, meridiem: &str) -> u32 {
    let pm = meridiem.eq_ignore_ascii_case("pm");
    match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    }
}

fn nine_am() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn localize<Tz: TimeZone>(now: &DateTime<Tz>, ndt: NaiveDateTime) -> Option<DateTime<Utc>> {
    now.timezone()
        .from_local_datetime(&ndt)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    /// Wednesday 2026-03-04 10:15 UTC.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 15, 0).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn iso_with_offset_passes_through() {
        let parsed = parse_datetime("2026-03-10T14:00:00+02:00", &now()).unwrap();
        assert_eq!(parsed, utc(2026, 3, 10, 12, 0));
        let parsed = parse_datetime("2024-01-15T14:00:00Z", &now()).unwrap();
        assert_eq!(parsed, utc(2024, 1, 15, 14, 0));
    }

    #[test]
    fn naive_iso_uses_local_zone() {
        let cet = FixedOffset::east_opt(3600).unwrap();
        let now = now().with_timezone(&cet);
        let parsed = parse_datetime("2026-03-10T14:00:00", &now).unwrap();
        assert_eq!(parsed, utc(2026, 3, 10, 13, 0));
        let parsed = parse_datetime("2026-03-10 09:30", &now).unwrap();
        assert_eq!(parsed, utc(2026, 3, 10, 8, 30));
    }

    #[test]
    fn tomorrow_at_6_pm() {
        assert_eq!(
            parse_datetime("tomorrow at 6 PM", &now()).unwrap(),
            utc(2026, 3, 5, 18, 0)
        );
    }

    #[test]
    fn next_monday_at_2_pm() {
        assert_eq!(
            parse_datetime("next Monday at 2 PM", &now()).unwrap(),
            utc(2026, 3, 9, 14, 0)
        );
    }

    #[test]
    fn next_weekday_skips_today() {
        assert_eq!(
            parse_datetime("next wednesday", &now()).unwrap(),
            utc(2026, 3, 11, 9, 0)
        );
    }

    #[test]
    fn today_with_24h_and_minutes() {
        assert_eq!(
            parse_datetime("today 16:45", &now()).unwrap(),
            utc(2026, 3, 4, 16, 45)
        );
        assert_eq!(
            parse_datetime("today at 2:30pm", &now()).unwrap(),
            utc(2026, 3, 4, 14, 30)
        );
    }

    #[test]
    fn next_week_defaults_to_nine() {
        assert_eq!(
            parse_datetime("next week", &now()).unwrap(),
            utc(2026, 3, 11, 9, 0)
        );
    }

    #[test]
    fn midnight_and_noon() {
        assert_eq!(
            parse_datetime("tomorrow 12 am", &now()).unwrap(),
            utc(2026, 3, 5, 0, 0)
        );
        assert_eq!(
            parse_datetime("tomorrow 12pm", &now()).unwrap(),
            utc(2026, 3, 5, 12, 0)
        );
    }

    #[test]
    fn unparseable_is_none() {
        assert!(parse_datetime("sometime soon", &now()).is_none());
        assert!(parse_datetime("", &now()).is_none());
        assert!(parse_datetime("2026-13-45", &now()).is_none());
    }
}
