//! Wall Clock
//!
//! Match timestamps are milliseconds since the Unix epoch as `f64`, the
//! representation carried by the Begin and Count messages.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type Millis = f64;

/// Current wall-clock time.
pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis() as Millis
}

/// Convert a duration to match milliseconds.
#[inline]
pub fn duration_millis(duration: Duration) -> Millis {
    duration.as_secs_f64() * 1000.0
}

/// Convert match milliseconds back to a UTC timestamp.
///
/// Returns `None` for values chrono cannot represent (NaN, far future).
pub fn to_datetime(millis: Millis) -> Option<DateTime<Utc>> {
    if !millis.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}
