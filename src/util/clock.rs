//! Clock helpers.
//!
//! Components take `now` as an explicit argument wherever ordering matters so
//! tests can drive time; these helpers are only used at the outer edges.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Current instant in UTC.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Convert epoch milliseconds to a UTC instant, clamping values chrono cannot represent.
pub fn ms_to_utc(ms: u128) -> DateTime<Utc> {
    let ms = i64::try_from(ms).unwrap_or(i64::MAX);
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert a UTC instant to epoch milliseconds (negative instants clamp to 0).
pub fn utc_to_ms(at: DateTime<Utc>) -> u128 {
    u128::try_from(at.timestamp_millis()).unwrap_or_default()
}
