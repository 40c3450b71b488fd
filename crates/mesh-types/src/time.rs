//! Millisecond wall-clock helpers.
//!
//! Values on pipes are timestamped at their origin node in milliseconds
//! since the Unix epoch. Expire and throttle arithmetic works on these
//! numbers directly; drift correction happens where the numbers are
//! compared, not here.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
