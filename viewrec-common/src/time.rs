//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Convert fractional seconds to duration
///
/// Negative and non-finite inputs clamp to zero; values beyond
/// `Duration::MAX` saturate.
pub fn secs_f64_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_millis_to_duration_one_second() {
        assert_eq!(millis_to_duration(1000), Duration::from_secs(1));
    }

    #[test]
    fn test_secs_f64_to_duration_fractional() {
        assert_eq!(secs_f64_to_duration(2.5), Duration::from_millis(2500));
    }

    #[test]
    fn test_secs_f64_to_duration_clamps_bad_input() {
        assert_eq!(secs_f64_to_duration(-1.0), Duration::ZERO);
        assert_eq!(secs_f64_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(secs_f64_to_duration(f64::INFINITY), Duration::ZERO);
    }

    #[test]
    fn test_secs_f64_to_duration_saturates_huge_values() {
        assert_eq!(secs_f64_to_duration(1e20), Duration::MAX);
        assert_eq!(secs_f64_to_duration(f64::MAX), Duration::MAX);
    }
}
