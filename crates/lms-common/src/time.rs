//! Timestamp formatting and timeframe windows.
//!
//! Every timestamp persisted by the backend is an RFC 3339 UTC string with
//! second precision (`2024-05-01T09:30:00Z`), so string comparison in SQL
//! agrees with chronological order.

use chrono::{DateTime, Datelike, Duration, NaiveTime, SecondsFormat, TimeZone, Utc};

use crate::models::Timeframe;

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_ts() -> String {
    format_ts(&Utc::now())
}

/// Parse a stored timestamp. Accepts any RFC 3339 offset.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
}

/// Midnight UTC of the day containing `ts`.
pub fn start_of_day(ts: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&ts.date_naive().and_time(NaiveTime::MIN))
}

/// Start of the window an event must fall after to count toward `timeframe`.
///
/// Weeks start on Sunday. `AllTime` starts at the Unix epoch.
pub fn timeframe_start(timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
    match timeframe {
        Timeframe::AllTime => DateTime::<Utc>::default(),
        Timeframe::Daily => start_of_day(&now),
        Timeframe::Weekly => {
            let days_since_sunday = now.weekday().num_days_from_sunday() as i64;
            start_of_day(&now) - Duration::days(days_since_sunday)
        }
        Timeframe::Monthly => {
            let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
            Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        parse_ts(s).unwrap()
    }

    #[test]
    fn format_is_second_precision_zulu() {
        let ts = at("2024-05-01T09:30:00.123+00:00");
        assert_eq!(format_ts(&ts), "2024-05-01T09:30:00Z");
    }

    #[test]
    fn parse_normalizes_offsets() {
        let ts = at("2024-05-01T11:30:00+02:00");
        assert_eq!(format_ts(&ts), "2024-05-01T09:30:00Z");
    }

    #[test]
    fn all_time_starts_at_epoch() {
        let start = timeframe_start(Timeframe::AllTime, at("2024-05-01T09:30:00Z"));
        assert_eq!(start.timestamp(), 0);
    }

    #[test]
    fn daily_starts_at_midnight() {
        let start = timeframe_start(Timeframe::Daily, at("2024-05-01T09:30:00Z"));
        assert_eq!(format_ts(&start), "2024-05-01T00:00:00Z");
    }

    #[test]
    fn weekly_starts_on_sunday() {
        // 2024-05-01 is a Wednesday.
        let start = timeframe_start(Timeframe::Weekly, at("2024-05-01T09:30:00Z"));
        assert_eq!(format_ts(&start), "2024-04-28T00:00:00Z");

        // A Sunday is its own week start.
        let start = timeframe_start(Timeframe::Weekly, at("2024-04-28T23:59:00Z"));
        assert_eq!(format_ts(&start), "2024-04-28T00:00:00Z");
    }

    #[test]
    fn monthly_starts_on_the_first() {
        let start = timeframe_start(Timeframe::Monthly, at("2024-02-29T18:00:00Z"));
        assert_eq!(format_ts(&start), "2024-02-01T00:00:00Z");
    }

    #[test]
    fn stored_strings_sort_chronologically() {
        let earlier = format_ts(&at("2024-01-09T23:00:00Z"));
        let later = format_ts(&at("2024-01-10T01:00:00Z"));
        assert!(earlier < later);
    }
}
