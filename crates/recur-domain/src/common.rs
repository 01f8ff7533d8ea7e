//! Calendar utilities for recurrence primitives.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};

/// Reduces a timestamp in any offset to its UTC calendar date.
///
/// All due-date arithmetic runs on the values this returns, so a rule created at
/// 23:30 in UTC-2 lands on the following UTC day rather than drifting.
pub fn utc_date<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> NaiveDate {
    timestamp.with_timezone(&Utc).date_naive()
}

/// Returns the number of days in `month` of `year`, or `None` past the calendar range.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|last| last.day())
}

/// Builds `year-month-day`, clamping `day` to the last valid day of the month.
pub fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let last = days_in_month(year, month)?;
    NaiveDate::from_ymd_opt(year, month, day.min(last))
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(1900, 2), Some(28));
        assert_eq!(days_in_month(2000, 2), Some(29));
        assert_eq!(days_in_month(2023, 12), Some(31));
        assert_eq!(days_in_month(2023, 4), Some(30));
    }

    #[test]
    fn clamped_date_limits_day_to_month_length() {
        assert_eq!(
            clamped_date(2023, 2, 31),
            NaiveDate::from_ymd_opt(2023, 2, 28)
        );
        assert_eq!(
            clamped_date(2023, 3, 31),
            NaiveDate::from_ymd_opt(2023, 3, 31)
        );
    }

    #[test]
    fn utc_date_normalizes_offsets() {
        let offset = FixedOffset::west_opt(2 * 3600).unwrap();
        let late_evening = offset.with_ymd_and_hms(2024, 3, 31, 23, 30, 0).unwrap();
        assert_eq!(
            utc_date(&late_evening),
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
        );
    }
}
