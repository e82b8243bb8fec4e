//! Timestamp conversions between entities and stored rows.
//!
//! Rows keep time as integer microseconds since the Unix epoch. Entity
//! constructors truncate to the same precision so a persisted value reloads
//! identically.

use chrono::{DateTime, Utc};

const MICROS_PER_SEC: i64 = 1_000_000;
const NANOS_PER_MICRO: i64 = 1_000;

/// Convert a time value to stored microseconds.
pub fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Convert stored microseconds back to a time value.
///
/// Returns `None` when the value is outside chrono's representable range.
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(MICROS_PER_SEC);
    let sub_micros = micros.rem_euclid(MICROS_PER_SEC);
    let nanos = u32::try_from(sub_micros.saturating_mul(NANOS_PER_MICRO)).ok()?;
    DateTime::from_timestamp(secs, nanos)
}

/// Drop sub-microsecond precision.
pub fn truncate(at: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(to_micros(at)).unwrap_or(at)
}

/// Current time at stored precision.
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_roundtrip_truncated() {
        let at = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 1).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        let truncated = truncate(at);
        assert_eq!(from_micros(to_micros(truncated)), Some(truncated));
        assert_eq!(truncated.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn test_pre_epoch_values() {
        let at = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap()
            + chrono::Duration::microseconds(250);
        assert_eq!(from_micros(to_micros(at)), Some(at));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(from_micros(i64::MAX), None);
        assert_eq!(from_micros(0), DateTime::from_timestamp(0, 0));
    }
}
