use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Longest delay a single step may carry.
pub const MAX_DELAY_DAYS: i64 = 3650;

/// How long to wait before a step fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySpec {
    Immediate,
    Seconds(u64),
    Minutes(u64),
    Days(u64),
    /// Fire at a fixed time; past targets fire immediately.
    At(DateTime<Utc>),
}

impl DelaySpec {
    /// Build from the editor's `delayType` / `delayValue` pair. Unknown types
    /// and missing magnitudes mean no delay.
    pub fn from_config(
        kind: Option<&str>,
        value: Option<f64>,
        at: Option<DateTime<Utc>>,
    ) -> Self {
        let magnitude = value.filter(|v| v.is_finite() && *v > 0.0).map(|v| v.round() as u64);
        match (kind.map(str::to_ascii_lowercase).as_deref(), magnitude) {
            (Some("seconds"), Some(n)) => DelaySpec::Seconds(n),
            (Some("minutes"), Some(n)) => DelaySpec::Minutes(n),
            (Some("days"), Some(n)) | (None, Some(n)) => DelaySpec::Days(n),
            (Some("absolute" | "absolute-timestamp" | "timestamp" | "datetime"), _) => match at {
                Some(at) => DelaySpec::At(at),
                None => {
                    warn!("Absolute delay without a timestamp, sending immediately");
                    DelaySpec::Immediate
                }
            },
            (Some("immediate"), _) | (_, None) => DelaySpec::Immediate,
            (Some(other), Some(_)) => {
                warn!(delay_type = other, "Unknown delay type, sending immediately");
                DelaySpec::Immediate
            }
        }
    }

    /// The `(delayType, delayValue, scheduledAt)` triple for this delay.
    pub fn to_config(self) -> (&'static str, Option<f64>, Option<DateTime<Utc>>) {
        match self {
            DelaySpec::Immediate => ("immediate", None, None),
            DelaySpec::Seconds(n) => ("seconds", Some(n as f64), None),
            DelaySpec::Minutes(n) => ("minutes", Some(n as f64), None),
            DelaySpec::Days(n) => ("days", Some(n as f64), None),
            DelaySpec::At(at) => ("absolute", None, Some(at)),
        }
    }

    /// Offset from `now`; never negative. `None` when the delay is longer
    /// than [`MAX_DELAY_DAYS`].
    pub fn offset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let offset = match *self {
            DelaySpec::Immediate => Duration::zero(),
            DelaySpec::Seconds(n) => Duration::try_seconds(i64::try_from(n).ok()?)?,
            DelaySpec::Minutes(n) => Duration::try_minutes(i64::try_from(n).ok()?)?,
            DelaySpec::Days(n) => Duration::try_days(i64::try_from(n).ok()?)?,
            DelaySpec::At(at) => (at - now).max(Duration::zero()),
        };
        (offset <= max_delay()).then_some(offset)
    }
}

fn max_delay() -> Duration {
    Duration::days(MAX_DELAY_DAYS)
}

/// Plan absolute fire times for a sequence of delays starting at `start`.
///
/// Relative delays count from the previous step's planned time; absolute
/// targets stand on their own. Planned times never go backwards, so steps
/// keep their graph order.
pub fn plan_timeline(delays: &[DelaySpec], start: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let mut prev = start;
    delays
        .iter()
        .map(|delay| {
            let base = match delay {
                DelaySpec::At(at) => *at,
                other => match other.offset(prev).and_then(|d| prev.checked_add_signed(d)) {
                    Some(at) => at,
                    None => {
                        warn!(?delay, "Delay out of range, not waiting");
                        prev
                    }
                },
            };
            prev = prev.max(base);
            prev
        })
        .collect()
}

/// Sleep until `when`, or return early if `cancel` fires.
///
/// Returns `true` when the time was reached, `false` on cancellation.
pub async fn wait_until(when: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let wait = (when - Utc::now()).to_std().unwrap_or_default();
    if wait.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_from_config() {
        assert_eq!(DelaySpec::from_config(Some("minutes"), Some(2.0), None), DelaySpec::Minutes(2));
        assert_eq!(DelaySpec::from_config(Some("Seconds"), Some(30.0), None), DelaySpec::Seconds(30));
        assert_eq!(DelaySpec::from_config(Some("days"), Some(0.0), None), DelaySpec::Immediate);
        assert_eq!(DelaySpec::from_config(None, None, None), DelaySpec::Immediate);
        assert_eq!(DelaySpec::from_config(Some("weeks"), Some(1.0), None), DelaySpec::Immediate);
        assert_eq!(
            DelaySpec::from_config(Some("absolute"), None, Some(t0())),
            DelaySpec::At(t0())
        );
    }

    #[test]
    fn test_offsets() {
        let now = t0();
        assert_eq!(DelaySpec::Immediate.offset(now), Some(Duration::zero()));
        assert_eq!(DelaySpec::Minutes(2).offset(now), Some(Duration::minutes(2)));
        assert_eq!(DelaySpec::Days(1).offset(now), Some(Duration::days(1)));
        assert_eq!(DelaySpec::At(now - Duration::hours(1)).offset(now), Some(Duration::zero()));
        assert_eq!(DelaySpec::At(now + Duration::hours(1)).offset(now), Some(Duration::hours(1)));
    }

    #[test]
    fn test_oversized_delays_have_no_offset() {
        let now = t0();
        assert_eq!(DelaySpec::Days(MAX_DELAY_DAYS as u64).offset(now), Some(Duration::days(MAX_DELAY_DAYS)));
        assert_eq!(DelaySpec::Days(MAX_DELAY_DAYS as u64 + 1).offset(now), None);
        assert_eq!(DelaySpec::Days(1_000_000_000).offset(now), None);
        assert_eq!(DelaySpec::Seconds(u64::MAX).offset(now), None);
        assert_eq!(DelaySpec::At(now + Duration::days(MAX_DELAY_DAYS + 1)).offset(now), None);

        let huge = DelaySpec::from_config(Some("days"), Some(1e300), None);
        assert_eq!(huge.offset(now), None);
    }

    #[test]
    fn test_plan_does_not_overflow_on_huge_delay() {
        let start = t0();
        let plan = plan_timeline(&[DelaySpec::Days(u64::MAX), DelaySpec::Minutes(1)], start);
        assert_eq!(plan, vec![start, start + Duration::minutes(1)]);
    }

    #[test]
    fn test_plan_is_cumulative_and_monotonic() {
        let start = t0();
        let plan = plan_timeline(
            &[
                DelaySpec::Immediate,
                DelaySpec::Minutes(2),
                DelaySpec::At(start - Duration::hours(1)),
                DelaySpec::Seconds(30),
            ],
            start,
        );
        assert_eq!(plan[0], start);
        assert_eq!(plan[1], start + Duration::minutes(2));
        assert_eq!(plan[2], start + Duration::minutes(2));
        assert_eq!(plan[3], start + Duration::minutes(2) + Duration::seconds(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_cut_short_by_cancel() {
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            t.cancel();
        });
        let reached = wait_until(Utc::now() + Duration::minutes(10), &token).await;
        assert!(!reached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reaches_target() {
        let token = CancellationToken::new();
        assert!(wait_until(Utc::now() + Duration::seconds(90), &token).await);
    }
}
