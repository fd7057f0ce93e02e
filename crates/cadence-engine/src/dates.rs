//! Deterministic date-range and time-phrase resolution.
//!
//! Used whenever the classifier is unavailable or returns something
//! unusable. All calendar arithmetic happens in the configured local offset.

use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday,
};
use regex::Regex;

use cadence_core::config::SchedulingConfig;
use cadence_core::types::{ParsedTime, TimeRange};

pub(crate) fn to_local(at: DateTime<Utc>, cfg: &SchedulingConfig) -> NaiveDateTime {
    (at + Duration::hours(cfg.utc_offset_hours as i64)).naive_utc()
}

pub(crate) fn to_utc(local: NaiveDateTime, cfg: &SchedulingConfig) -> DateTime<Utc> {
    Utc.from_utc_datetime(&(local - Duration::hours(cfg.utc_offset_hours as i64)))
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn weekday_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(monday|tuesday|wednesday|thursday|friday|saturday|sunday|mon|tues?|wed|thu|thurs?|fri|sat|sun)\b",
        )
        .expect("valid regex")
    })
}

fn meridiem_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(a\.m\.|p\.m\.|am\b|pm\b)").expect("valid regex")
    })
}

fn clock_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2}):(\d{2})\b|\bat\s+(\d{1,2})\b").expect("valid regex")
    })
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    let w = word.to_lowercase();
    Some(match w.get(..3)? {
        "mon" => Weekday::Mon,
        "tue" => Weekday::Tue,
        "wed" => Weekday::Wed,
        "thu" => Weekday::Thu,
        "fri" => Weekday::Fri,
        "sat" => Weekday::Sat,
        "sun" => Weekday::Sun,
        _ => return None,
    })
}

/// First weekday named in `text`.
pub(crate) fn mentioned_weekday(text: &str) -> Option<Weekday> {
    weekday_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_weekday(m.as_str()))
}

/// Whether `text` names a day: a weekday, today or tomorrow.
pub(crate) fn mentions_day(text: &str) -> bool {
    let lower = text.to_lowercase();
    mentioned_weekday(text).is_some() || lower.contains("tomorrow") || lower.contains("today")
}

/// Whether `text` names a clock time ("2pm", "10:30", "noon").
pub(crate) fn mentions_time(text: &str) -> bool {
    meridiem_regex().is_match(text)
        || clock_regex().is_match(text)
        || text.to_lowercase().contains("noon")
}

/// The next date strictly after `from` falling on `target`.
fn next_weekday(from: NaiveDate, target: Weekday) -> NaiveDate {
    let ahead = (target.num_days_from_monday() as i64 - from.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    from + Duration::days(if ahead == 0 { 7 } else { ahead })
}

fn next_business_day(from: NaiveDate, include_weekends: bool) -> NaiveDate {
    let mut day = from + Duration::days(1);
    while !include_weekends && matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
        day += Duration::days(1);
    }
    day
}

/// Turn a human range label ("next week", "tomorrow", "friday") into
/// absolute bounds. Unknown labels cover the configured lookahead.
/// The range never starts before `now`.
pub fn resolve_range(label: &str, now: DateTime<Utc>, cfg: &SchedulingConfig) -> TimeRange {
    let lower = label.to_lowercase();
    let today = to_local(now, cfg).date();
    let day_range = |start: NaiveDate, days: i64| {
        TimeRange::new(
            to_utc(midnight(start), cfg),
            to_utc(midnight(start + Duration::days(days)), cfg),
        )
    };

    let range = if lower.contains("2 weeks") || lower.contains("two weeks") {
        TimeRange::new(now, now + Duration::days(14))
    } else if lower.contains("next week") {
        day_range(next_weekday(today, Weekday::Mon), 7)
    } else if lower.contains("this week") {
        TimeRange::new(now, to_utc(midnight(next_weekday(today, Weekday::Mon)), cfg))
    } else if lower.contains("tomorrow") {
        day_range(today + Duration::days(1), 1)
    } else if lower.contains("today") {
        day_range(today, 1)
    } else if let Some(day) = mentioned_weekday(&lower) {
        day_range(next_weekday(today, day), 1)
    } else {
        TimeRange::new(now, now + Duration::days(cfg.lookahead_days))
    };

    TimeRange::new(range.start.max(now), range.end.max(now))
}

/// Resolve a phrase like "Tuesday at 2pm" against `reference`.
///
/// The day is a named weekday (its next occurrence), tomorrow, today, next
/// week (its Monday), or else the next business day. The time defaults to
/// 2:00 PM; bare hours up to 7 are read as afternoon.
pub fn parse_time_phrase(
    phrase: &str,
    reference: DateTime<Utc>,
    cfg: &SchedulingConfig,
) -> ParsedTime {
    let lower = phrase.to_lowercase();
    let today = to_local(reference, cfg).date();

    let date = if let Some(day) = mentioned_weekday(&lower) {
        next_weekday(today, day)
    } else if lower.contains("tomorrow") {
        today + Duration::days(1)
    } else if lower.contains("today") {
        today
    } else if lower.contains("next week") {
        next_weekday(today, Weekday::Mon)
    } else {
        next_business_day(today, cfg.include_weekends)
    };

    let time = parse_clock(&lower)
        .or_else(|| NaiveTime::from_hms_opt(14, 0, 0))
        .unwrap_or(NaiveTime::MIN);
    let local_start = date.and_time(time);
    let start = to_utc(local_start, cfg);
    let end = start + Duration::minutes(cfg.meeting_minutes);

    ParsedTime {
        start,
        end,
        display: format_local(local_start),
    }
}

fn parse_clock(lower: &str) -> Option<NaiveTime> {
    if let Some(c) = meridiem_regex().captures(lower) {
        let hour: u32 = c.get(1)?.as_str().parse().ok()?;
        let minute: u32 = c.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
        let pm = c.get(3)?.as_str().starts_with('p');
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    if lower.contains("noon") {
        return NaiveTime::from_hms_opt(12, 0, 0);
    }
    if let Some(c) = clock_regex().captures(lower) {
        let (hour, minute) = match (c.get(1), c.get(2), c.get(3)) {
            (Some(h), Some(m), _) => (h.as_str().parse().ok()?, m.as_str().parse().ok()?),
            (_, _, Some(h)) => (h.as_str().parse::<u32>().ok()?, 0),
            _ => return None,
        };
        let hour = if (1..=7).contains(&hour) { hour + 12 } else { hour };
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    None
}

/// "Tuesday, March 3 at 2:00 PM"
pub(crate) fn format_local(local: NaiveDateTime) -> String {
    local.format("%A, %B %-d at %-I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_test_utils::fixtures::monday_at;

    fn cfg() -> SchedulingConfig {
        SchedulingConfig::default()
    }

    #[test]
    fn test_parse_weekday_and_pm() {
        let parsed = parse_time_phrase("How about Tuesday at 2pm?", monday_at(10), &cfg());
        assert_eq!(parsed.start, Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap());
        assert_eq!(parsed.end - parsed.start, Duration::minutes(30));
        assert_eq!(parsed.display, "Tuesday, March 3 at 2:00 PM");
    }

    #[test]
    fn test_same_weekday_means_next_week() {
        let parsed = parse_time_phrase("monday 10:30am", monday_at(8), &cfg());
        assert_eq!(parsed.start, Utc.with_ymd_and_hms(2026, 3, 9, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_defaults_and_bare_hours() {
        let tomorrow = parse_time_phrase("tomorrow works", monday_at(9), &cfg());
        assert_eq!(tomorrow.start, Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap());

        let bare = parse_time_phrase("tomorrow at 3", monday_at(9), &cfg());
        assert_eq!(bare.start, Utc.with_ymd_and_hms(2026, 3, 3, 15, 0, 0).unwrap());

        let noon = parse_time_phrase("next week around noon", monday_at(9), &cfg());
        assert_eq!(noon.start, Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap());

        // Friday reference, no day named: skip the weekend.
        let friday = Utc.with_ymd_and_hms(2026, 3, 6, 9, 0, 0).unwrap();
        let next = parse_time_phrase("sounds good", friday, &cfg());
        assert_eq!(next.start, Utc.with_ymd_and_hms(2026, 3, 9, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_utc_offset_applies() {
        let mut c = cfg();
        c.utc_offset_hours = -5;
        let parsed = parse_time_phrase("Tuesday at 2pm", monday_at(15), &c);
        assert_eq!(parsed.start, Utc.with_ymd_and_hms(2026, 3, 3, 19, 0, 0).unwrap());
        assert_eq!(parsed.display, "Tuesday, March 3 at 2:00 PM");
    }

    #[test]
    fn test_resolve_ranges() {
        let now = monday_at(10);
        let next_week = resolve_range("next week", now, &cfg());
        assert_eq!(next_week.start, Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());
        assert_eq!(next_week.end, Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap());

        let today = resolve_range("today", now, &cfg());
        assert_eq!(today.start, now);

        let friday = resolve_range("Friday", now, &cfg());
        assert_eq!(friday.start, Utc.with_ymd_and_hms(2026, 3, 6, 0, 0, 0).unwrap());

        let unknown = resolve_range("whenever", now, &cfg());
        assert_eq!(unknown.end - unknown.start, Duration::days(cfg().lookahead_days));
    }

    #[test]
    fn test_mentions() {
        assert!(mentions_time("2pm works"));
        assert!(mentions_time("at 10:30"));
        assert!(!mentions_time("I have 2 kids"));
        assert!(mentions_day("thursday?"));
        assert!(!mentions_day("some time soon"));
    }
}
