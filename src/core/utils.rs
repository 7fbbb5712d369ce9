use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 timestamp (`2024-05-01T12:00:00.000Z`).
///
/// Stored timestamps compare correctly as plain strings in SQL.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = format_timestamp(Utc.with_ymd_and_hms(2024, 1, 9, 23, 0, 0).unwrap());
        let late = format_timestamp(Utc.with_ymd_and_hms(2024, 1, 10, 1, 0, 0).unwrap());
        assert_eq!(early, "2024-01-09T23:00:00.000Z");
        assert!(early < late);
    }
}
