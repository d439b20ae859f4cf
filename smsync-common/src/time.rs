//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a Slack message/reaction timestamp to seconds.
///
/// Accepts pure timestamps ("1700000000.123456") or composite identifiers
/// like "<ts>_<name>_<user>" (the first `_`-separated part is taken).
/// Returns `f64::INFINITY` on failure so unparseable items sort last.
pub fn parse_slack_ts(slack_id: &str) -> f64 {
    let head = slack_id.split('_').next().unwrap_or(slack_id);
    head.parse::<f64>().unwrap_or(f64::INFINITY)
}

/// Convert a Slack `ts` value to Unix milliseconds.
///
/// Mattermost `create_at` fields are millisecond epochs. Returns None when
/// the timestamp cannot be parsed.
pub fn slack_ts_to_millis(ts: &str) -> Option<i64> {
    let seconds = parse_slack_ts(ts);
    if seconds.is_finite() {
        Some((seconds * 1000.0).round() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_ts() {
        assert_eq!(parse_slack_ts("1700000000.000100"), 1_700_000_000.0001);
    }

    #[test]
    fn test_parse_composite_id_takes_ts_prefix() {
        assert_eq!(parse_slack_ts("1700000000.5_thumbsup_U123"), 1_700_000_000.5);
    }

    #[test]
    fn test_parse_garbage_sorts_last() {
        assert!(parse_slack_ts("not-a-ts").is_infinite());
        assert!(parse_slack_ts("").is_infinite());
    }

    #[test]
    fn test_ts_to_millis() {
        assert_eq!(slack_ts_to_millis("1700000000.123456"), Some(1_700_000_000_123));
        assert_eq!(slack_ts_to_millis("bogus"), None);
    }

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }
}
