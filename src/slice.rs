//! Time slices: half-open intervals aligned to the configured output
//! duration.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputDuration {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A half-open `[start, next)` interval aligned to the output duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub start: DateTime<Utc>,
    pub next: DateTime<Utc>,
}

impl Slice {
    /// The slice containing midnight of `date`, aligned to `duration`. For
    /// `Hourly` this is the `[00:00, 01:00)` slice of that date; callers
    /// that need every hour of a day iterate with `next_slice`.
    pub fn containing(date: NaiveDate, duration: OutputDuration) -> Self {
        let start = align(midnight_utc(date), duration);
        let next = advance(start, duration);
        Self { start, next }
    }

    /// The slice immediately following this one. Operates on the full
    /// instant (not just the date) so hourly slices advance by one hour
    /// instead of collapsing back to day granularity.
    pub fn next_slice(&self, duration: OutputDuration) -> Self {
        let start = align(self.next, duration);
        let next = advance(start, duration);
        Self { start, next }
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        let at = midnight_utc(date);
        at >= self.start && at < self.next
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is always valid"))
}

fn align(at: DateTime<Utc>, duration: OutputDuration) -> DateTime<Utc> {
    let date = at.date_naive();
    match duration {
        OutputDuration::Hourly => {
            Utc.from_utc_datetime(&date.and_hms_opt(at.hour(), 0, 0).expect("hour is always valid"))
        }
        OutputDuration::Daily => midnight_utc(date),
        OutputDuration::Weekly => {
            let days_since_monday = date.weekday().num_days_from_monday();
            midnight_utc(date - Duration::days(days_since_monday as i64))
        }
        OutputDuration::Monthly => midnight_utc(NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()),
        OutputDuration::Yearly => midnight_utc(NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap()),
    }
}

fn advance(start: DateTime<Utc>, duration: OutputDuration) -> DateTime<Utc> {
    let date = start.date_naive();
    match duration {
        OutputDuration::Hourly => start + Duration::hours(1),
        OutputDuration::Daily => midnight_utc(date.succ_opt().unwrap()),
        OutputDuration::Weekly => start + Duration::days(7),
        OutputDuration::Monthly => {
            if date.month() == 12 {
                midnight_utc(NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap())
            } else {
                midnight_utc(NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1).unwrap())
            }
        }
        OutputDuration::Yearly => midnight_utc(NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).unwrap()),
    }
}

/// Enumerate every slice of `duration` whose interval intersects
/// `[start, end]` (inclusive days, UTC), in ascending order.
pub fn slices_for_range(start: NaiveDate, end: NaiveDate, duration: OutputDuration) -> Vec<Slice> {
    let mut slices = Vec::new();
    let mut current = Slice::containing(start, duration);
    let end_boundary = midnight_utc(end.succ_opt().unwrap_or(end));
    while current.start < end_boundary {
        slices.push(current);
        current = current.next_slice(duration);
    }
    slices
}

#[allow(dead_code)]
fn assert_weekday_monday(_: Weekday) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn hourly_slice_is_one_hour() {
        let slice = Slice::containing(d(2024, 1, 3), OutputDuration::Hourly);
        assert_eq!(slice.start, midnight_utc(d(2024, 1, 3)));
        assert_eq!(slice.next, midnight_utc(d(2024, 1, 3)) + Duration::hours(1));
    }

    #[test]
    fn hourly_slices_for_range_cover_24_per_day() {
        let slices = slices_for_range(d(2024, 1, 1), d(2024, 1, 1), OutputDuration::Hourly);
        assert_eq!(slices.len(), 24);
        assert_eq!(slices[1].start, midnight_utc(d(2024, 1, 1)) + Duration::hours(1));
        assert_eq!(slices[23].next, midnight_utc(d(2024, 1, 2)));
    }

    #[test]
    fn daily_slice_is_one_day() {
        let slice = Slice::containing(d(2024, 1, 3), OutputDuration::Daily);
        assert_eq!(slice.start, midnight_utc(d(2024, 1, 3)));
        assert_eq!(slice.next, midnight_utc(d(2024, 1, 4)));
    }

    #[test]
    fn weekly_slice_normalizes_to_monday() {
        // 2024-01-03 is a Wednesday.
        let slice = Slice::containing(d(2024, 1, 3), OutputDuration::Weekly);
        assert_eq!(slice.start.weekday(), Weekday::Mon);
        assert_eq!(slice.start, midnight_utc(d(2024, 1, 1)));
        assert_eq!(slice.next, midnight_utc(d(2024, 1, 8)));
    }

    #[test]
    fn monthly_slice_spans_whole_month() {
        let slice = Slice::containing(d(2024, 2, 15), OutputDuration::Monthly);
        assert_eq!(slice.start, midnight_utc(d(2024, 2, 1)));
        assert_eq!(slice.next, midnight_utc(d(2024, 3, 1)));
    }

    #[test]
    fn yearly_slice_rolls_over_december() {
        let slice = Slice::containing(d(2024, 12, 20), OutputDuration::Yearly);
        assert_eq!(slice.next, midnight_utc(d(2025, 1, 1)));
    }

    #[test]
    fn slices_for_range_covers_three_days() {
        let slices = slices_for_range(d(2024, 1, 1), d(2024, 1, 3), OutputDuration::Daily);
        assert_eq!(slices.len(), 3);
        assert!(slices[0].contains_date(d(2024, 1, 1)));
        assert!(slices[2].contains_date(d(2024, 1, 3)));
    }
}
