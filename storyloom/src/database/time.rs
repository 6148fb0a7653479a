//! Timestamp helpers. Rows store Unix epoch milliseconds (UTC) as `INTEGER`.

use chrono::{DateTime, Utc};

#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored milliseconds back to a timestamp, falling back to the epoch
/// for values chrono cannot represent.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
