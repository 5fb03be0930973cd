//! Timestamp utilities
//!
//! Media timestamps travel as signed microseconds (container presentation
//! times can be negative after edit lists); clock values as `f64` seconds.

use chrono::{DateTime, Utc};

/// Microseconds per second
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a tick count in `timescale` units to microseconds
///
/// Uses 128-bit intermediate arithmetic so large tick counts at fine
/// timescales do not overflow. A zero timescale yields zero.
pub fn ticks_to_micros(ticks: i64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    ((ticks as i128 * MICROS_PER_SEC as i128) / timescale as i128) as i64
}

/// Convert seconds to microseconds
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC as f64).round() as i64
}

/// Convert microseconds to seconds
pub fn micros_to_secs(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SEC as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_ticks_to_micros_common_timescales() {
        assert_eq!(ticks_to_micros(48_000, 48_000), 1_000_000);
        assert_eq!(ticks_to_micros(1024, 48_000), 21_333);
        assert_eq!(ticks_to_micros(3003, 90_000), 33_366);
        assert_eq!(ticks_to_micros(1, 1000), 1000);
    }

    #[test]
    fn test_ticks_to_micros_zero_timescale() {
        assert_eq!(ticks_to_micros(12345, 0), 0);
    }

    #[test]
    fn test_ticks_to_micros_large_values_do_not_overflow() {
        // 10 hours at 1 GHz ticks
        let ticks = 36_000_000_000_000i64;
        assert_eq!(ticks_to_micros(ticks, 1_000_000_000), 36_000_000_000);
    }

    #[test]
    fn test_secs_micros_conversion() {
        assert_eq!(secs_to_micros(5.25), 5_250_000);
        assert_eq!(micros_to_secs(250_000), 0.25);
    }
}
