use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

use cadence_core::config::SchedulingConfig;
use cadence_core::types::TimeRange;

use crate::dates::{format_local, to_local, to_utc};

/// Free meeting slots inside `range`, walking business hours day by day.
///
/// A slot is kept when it lies inside `range`, starts no earlier than `now`
/// and overlaps no busy interval. At most `cfg.max_slots` are returned.
pub fn free_slots(
    range: TimeRange,
    busy: &[TimeRange],
    cfg: &SchedulingConfig,
    now: DateTime<Utc>,
) -> Vec<TimeRange> {
    let mut slots = Vec::new();
    if cfg.slot_minutes <= 0 || cfg.max_slots == 0 {
        return slots;
    }
    let (Some(open), Some(close)) = (
        NaiveTime::from_hms_opt(cfg.business_start_hour, 0, 0),
        NaiveTime::from_hms_opt(cfg.business_end_hour.min(23), 0, 0),
    ) else {
        return slots;
    };
    let close_offset = if cfg.business_end_hour >= 24 {
        Duration::hours(24)
    } else {
        close - NaiveTime::MIN
    };
    let step = Duration::minutes(cfg.slot_minutes);
    let length = Duration::minutes(cfg.meeting_minutes.max(cfg.slot_minutes));

    let mut day = to_local(range.start, cfg).date();
    let last_day = to_local(range.end, cfg).date();
    while day <= last_day {
        if cfg.include_weekends || !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            let day_close = day.and_time(NaiveTime::MIN) + close_offset;
            let mut start = day.and_time(open);
            while start + length <= day_close {
                let slot = TimeRange::new(to_utc(start, cfg), to_utc(start + length, cfg));
                let inside = slot.start >= range.start && slot.end <= range.end;
                if inside && slot.start >= now && !busy.iter().any(|b| b.overlaps(&slot)) {
                    slots.push(slot);
                    if slots.len() >= cfg.max_slots {
                        return slots;
                    }
                }
                start += step;
            }
        }
        day += Duration::days(1);
    }
    slots
}

/// One bullet line per slot, in local time.
pub fn format_slots(slots: &[TimeRange], cfg: &SchedulingConfig) -> String {
    slots
        .iter()
        .map(|s| format!("- {}", format_local(to_local(s.start, cfg))))
        .collect::<Vec<_>>()
        .join("\n")
}
