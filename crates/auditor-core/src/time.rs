//! UTC calendar windows.
//!
//! All day, month, and year boundaries are evaluated in UTC.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// 00:00 UTC on the day containing `now`
#[must_use]
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    midnight(now.date_naive())
}

/// 00:00 UTC on the first day of the month containing `now`
#[must_use]
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    midnight(date - Days::new(u64::from(date.day0())))
}

/// 00:00 UTC on January 1 of the year containing `now`
#[must_use]
pub fn start_of_year(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now.date_naive();
    midnight(date - Days::new(u64::from(date.ordinal0())))
}

/// Number of days in the month containing `now`
#[must_use]
pub fn days_in_month(now: DateTime<Utc>) -> u32 {
    let first = start_of_month(now).date_naive();
    let next = first + Months::new(1);
    (next - first).num_days() as u32
}

/// Days of the month elapsed so far, counting today (always >= 1)
#[must_use]
pub fn days_elapsed_in_month(now: DateTime<Utc>) -> u32 {
    now.day()
}

/// Start of a trailing window of `days` days ending at `now`
#[must_use]
pub fn trailing_window(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - chrono::Duration::days(i64::from(days))
}
