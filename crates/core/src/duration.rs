//! Duration strings used across the configuration: `<number>` or `<number><unit>`.

use std::time::Duration;

use crate::error::{CoreError, Result};

/// Milliseconds in one game tick (`t` unit).
pub const MS_PER_TICK: u64 = 50;

/// Parse a duration string.
///
/// Accepts `^(\d+)(t|ms|s|m|h)?$` (case-insensitive, surrounding whitespace
/// ignored). A bare number is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || CoreError::InvalidDuration {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let duration = match unit.to_ascii_lowercase().as_str() {
        "" | "ms" => Duration::from_millis(value),
        "t" => Duration::from_millis(value.saturating_mul(MS_PER_TICK)),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3_600)),
        _ => return Err(invalid()),
    };
    Ok(duration)
}

/// Parse a duration, falling back to `default` on blank or invalid input.
pub fn parse_duration_or(input: Option<&str>, default: Duration) -> Duration {
    match input {
        Some(s) if !s.trim().is_empty() => parse_duration(s).unwrap_or_else(|e| {
            tracing::warn!(error = %e, default = ?default, "invalid duration, using default");
            default
        }),
        _ => default,
    }
}

/// Human-readable rendering: `45s`, `2m 5s`, `1h 30m`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3_600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_is_milliseconds() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn units() {
        assert_eq!(parse_duration("20t").unwrap(), Duration::from_millis(1_000));
        assert_eq!(parse_duration("15ms").unwrap(), Duration::from_millis(15));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7_200));
    }

    #[test]
    fn unit_is_case_insensitive_and_trimmed() {
        assert_eq!(parse_duration("  10S ").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("3MS").unwrap(), Duration::from_millis(3));
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", "s", "1.5s", "10 s", "-5s", "1d", "2h30m"] {
            assert!(parse_duration(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn parse_or_default() {
        let d = Duration::from_secs(7);
        assert_eq!(parse_duration_or(None, d), d);
        assert_eq!(parse_duration_or(Some("  "), d), d);
        assert_eq!(parse_duration_or(Some("nope"), d), d);
        assert_eq!(parse_duration_or(Some("1m"), d), Duration::from_secs(60));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(5_400)), "1h 30m");
    }
}
