//! Deadline arithmetic. This is the only place where wall-clock locale matters; everything else
//! in the engine works with absolute UTC instants.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};

/// Converts allocation instants into payment deadlines in a configured locale.
///
/// A deadline is `updated_at + pay_within + grace`, rounded up to the next full hour of the
/// locale's wall clock (an instant already on the hour is left alone). The grace hour defaults to
/// one hour; whether it is an off-by-one guard or deliberate in the original product is unknown,
/// so it is configurable rather than hard-coded.
#[derive(Debug, Clone, Copy)]
pub struct Timekeeper {
    offset: FixedOffset,
    grace: Duration,
}

impl Default for Timekeeper {
    fn default() -> Self {
        Self { offset: FixedOffset::east_opt(0).expect("zero offset is valid"), grace: Duration::hours(1) }
    }
}

impl Timekeeper {
    pub fn new(offset: FixedOffset, grace: Duration) -> Self {
        Self { offset, grace }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// The instant an unpaid ticket is reclaimed, given when it last changed state and the
    /// release's pay-within duration.
    pub fn must_pay_before(&self, updated_at: DateTime<Utc>, pay_within: Duration) -> DateTime<Utc> {
        let local = updated_at.with_timezone(&self.offset) + pay_within + self.grace;
        let truncated = local
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(local);
        let rounded = if truncated < local { truncated + Duration::hours(1) } else { truncated };
        rounded.with_timezone(&Utc)
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn deadline_rounds_up_to_the_next_full_hour() {
        let tk = Timekeeper::default();
        let updated = Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56).unwrap();
        let deadline = tk.must_pay_before(updated, Duration::hours(1));
        assert_eq!(deadline, Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap());
    }

    #[test]
    fn an_instant_on_the_hour_is_not_rounded() {
        let tk = Timekeeper::default();
        let updated = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let deadline = tk.must_pay_before(updated, Duration::hours(1));
        assert_eq!(deadline, Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap());
    }

    #[test]
    fn locale_offset_shifts_the_hour_boundary() {
        // +05:30: hour boundaries do not line up with UTC's, so the rounding lands on a
        // half-hour UTC instant.
        let tk = Timekeeper::new(FixedOffset::east_opt(5 * 3600 + 1800).unwrap(), Duration::hours(1));
        let updated = Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56).unwrap();
        let deadline = tk.must_pay_before(updated, Duration::hours(1));
        assert_eq!(deadline, Utc.with_ymd_and_hms(2024, 6, 1, 15, 30, 0).unwrap());
    }

    #[test]
    fn grace_is_configurable() {
        let tk = Timekeeper::new(FixedOffset::east_opt(0).unwrap(), Duration::zero());
        let updated = Utc.with_ymd_and_hms(2024, 6, 1, 12, 34, 56).unwrap();
        let deadline = tk.must_pay_before(updated, Duration::hours(1));
        assert_eq!(deadline, Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap());
    }
}
