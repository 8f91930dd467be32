//! Relationship dates as shown on the home and profile screens. Durations
//! count whole days, with 30-day months and 12-month years.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};

const DAYS_PER_MONTH: i64 = 30;
const MONTHS_PER_YEAR: i64 = 12;

fn whole_days<Tz: TimeZone>(start: &DateTime<Tz>, end: &DateTime<Tz>) -> i64 {
    (end.clone() - start.clone()).num_days().abs()
}

/// `"2 years, 3 months, 4 days"`, dropping leading zero units.
pub fn relationship_duration<Tz: TimeZone>(start: &DateTime<Tz>, end: &DateTime<Tz>) -> String {
    let days = whole_days(start, end);
    let months = days / DAYS_PER_MONTH;
    let years = months / MONTHS_PER_YEAR;

    if years > 0 {
        format!(
            "{} years, {} months, {} days",
            years,
            months % MONTHS_PER_YEAR,
            days % DAYS_PER_MONTH
        )
    } else if months > 0 {
        format!("{} months, {} days", months, days % DAYS_PER_MONTH)
    } else {
        format!("{} days", days)
    }
}

/// `"412 Days"`
pub fn relationship_days<Tz: TimeZone>(start: &DateTime<Tz>, now: &DateTime<Tz>) -> String {
    format!("{} Days", whole_days(start, now))
}

/// Largest whole unit only: `"3 Years"`, `"1 Month"`, `"5 Days"`. Used for
/// ages and short relationship summaries.
pub fn coarse_duration<Tz: TimeZone>(start: &DateTime<Tz>, now: &DateTime<Tz>) -> String {
    let days = whole_days(start, now);
    let months = days / DAYS_PER_MONTH;
    let years = months / MONTHS_PER_YEAR;

    let (n, unit) = if years > 0 {
        (years, "Year")
    } else if months > 0 {
        (months, "Month")
    } else {
        (days, "Day")
    };
    format!("{} {}{}", n, unit, if n > 1 { "s" } else { "" })
}

/// The next anniversary of `start` on or after `today`. A Feb 29 start is
/// celebrated on Feb 28 in common years.
pub fn next_anniversary(start: NaiveDate, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = anniversary_in(start, today.year())?;
    if this_year >= today {
        Some(this_year)
    } else {
        anniversary_in(start, today.year() + 1)
    }
}

fn anniversary_in(start: NaiveDate, year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, start.month(), start.day())
        .or_else(|| NaiveDate::from_ymd_opt(year, start.month(), start.day() - 1))
}

pub fn days_until(date: NaiveDate, today: NaiveDate) -> i64 {
    (date - today).num_days()
}

/// `"Today at 09:05 PM"`, `"Yesterday at 11:30 AM"` or
/// `"Mar 4, 2024 at 08:00 AM"`, in the zone of `ts`.
pub fn format_timestamp<Tz>(ts: &DateTime<Tz>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let time = ts.format("%I:%M %p");
    let day = ts.date_naive();
    let today = now.date_naive();

    if day == today {
        format!("Today at {}", time)
    } else if today.pred_opt() == Some(day) {
        format!("Yesterday at {}", time)
    } else {
        format!("{} at {}", ts.format("%b %-d, %Y"), time)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn durations_use_thirty_day_months() {
        let start = at(2020, 1, 1, 0, 0);
        assert_eq!(relationship_duration(&start, &(start + Duration::days(5))), "5 days");
        assert_eq!(relationship_duration(&start, &(start + Duration::days(65))), "2 months, 5 days");
        assert_eq!(
            relationship_duration(&start, &(start + Duration::days(400))),
            "1 years, 1 months, 10 days"
        );
        // Order of the arguments does not matter
        assert_eq!(relationship_duration(&(start + Duration::days(5)), &start), "5 days");
        assert_eq!(relationship_days(&start, &(start + Duration::hours(50))), "2 Days");
    }

    #[test]
    fn coarse_units_and_plurals() {
        let start = at(2000, 6, 1, 0, 0);
        assert_eq!(coarse_duration(&start, &(start + Duration::days(1))), "1 Day");
        assert_eq!(coarse_duration(&start, &(start + Duration::days(3))), "3 Days");
        assert_eq!(coarse_duration(&start, &(start + Duration::days(31))), "1 Month");
        assert_eq!(coarse_duration(&start, &(start + Duration::days(800))), "2 Years");
    }

    #[test]
    fn anniversaries() {
        let start = date(2019, 6, 15);
        assert_eq!(next_anniversary(start, date(2024, 3, 1)), Some(date(2024, 6, 15)));
        assert_eq!(next_anniversary(start, date(2024, 6, 15)), Some(date(2024, 6, 15)));
        assert_eq!(next_anniversary(start, date(2024, 7, 1)), Some(date(2025, 6, 15)));

        let leap = date(2020, 2, 29);
        assert_eq!(next_anniversary(leap, date(2023, 1, 1)), Some(date(2023, 2, 28)));
        assert_eq!(next_anniversary(leap, date(2024, 1, 1)), Some(date(2024, 2, 29)));
        assert_eq!(days_until(date(2024, 2, 29), date(2024, 2, 1)), 28);
    }

    #[test]
    fn timestamps_relative_to_today() {
        let now = at(2024, 3, 1, 18, 0);
        assert_eq!(format_timestamp(&at(2024, 3, 1, 21, 5), &now), "Today at 09:05 PM");
        assert_eq!(format_timestamp(&at(2024, 2, 29, 11, 30), &now), "Yesterday at 11:30 AM");
        assert_eq!(format_timestamp(&at(2024, 2, 4, 8, 0), &now), "Feb 4, 2024 at 08:00 AM");
    }
}
