use chrono::{DateTime, Datelike, Duration, NaiveDate, SecondsFormat, Timelike, Utc, Weekday};

/// Fixed-width RFC 3339 (`2024-01-01T00:00:00Z`); lexicographic order equals time order.
pub fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Drops sub-second precision so stored and in-memory values compare equal.
pub fn truncate_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_nanosecond(0).unwrap_or(t)
}

pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    date_at_midnight(t.date_naive())
}

pub fn date_at_midnight(date: NaiveDate) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc)
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Next `count` weekdays (at midnight UTC) strictly after both `after_bar` and `after_ts`.
pub fn business_days_after(
    after_bar: DateTime<Utc>,
    after_ts: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let mut days = Vec::with_capacity(count);
    let mut date = after_bar.date_naive();
    while days.len() < count {
        date += Duration::days(1);
        let candidate = date_at_midnight(date);
        if is_weekday(date) && candidate > after_ts && candidate > after_bar {
            days.push(candidate);
        }
    }
    days
}
