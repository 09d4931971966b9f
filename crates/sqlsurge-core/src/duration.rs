//! Duration parsing for tuning profiles and seconds-based serialization
//! for reports.

use std::time::Duration;

use serde::Serializer;

/// Longest run length, pause or reporting cadence a config may ask for.
pub const MAX_SPAN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Parse a duration string like `"5s"`, `"500ms"`, `"2m"`, or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// `#[serde(serialize_with = "...")]` helper: a `Duration` as float seconds.
pub fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
