use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Result, SlacklogError};

/// Text form used for the `Timestamp` attachment field.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration).map_err(|e| {
                SlacklogError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(SlacklogError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| SlacklogError::Parse(format!("invalid duration {input}: {e}")))
}
