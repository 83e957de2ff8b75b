//! Small helpers shared across the daemon.

use std::borrow::Cow;

use jiff::{Timestamp, Zoned};

/// Wall-clock time as fractional seconds since the epoch. Queue timestamps,
/// history entries and the save-timer comparison all use this representation.
pub fn now_secs() -> f64 {
    Timestamp::now().as_nanosecond() as f64 / 1e9
}

/// Timestamp in the `HH:MM:SS[am|pm]` form used by the server log and the
/// player-log headers.
pub fn clock_stamp(now: &Zoned) -> String {
    let hour = now.hour();
    let (hour12, meridiem) = match hour {
        0 => (12, "am"),
        1..=11 => (hour, "am"),
        12 => (12, "pm"),
        _ => (hour - 12, "pm"),
    };
    format!(
        "{:02}:{:02}:{:02}{}",
        hour12,
        now.minute(),
        now.second(),
        meridiem
    )
}

/// `HH:MM:SS` rendering of a duration in seconds, for the "total playing
/// time" log line.
pub fn fmt_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Queue items are raw bytes; anything that ends up in a log line goes
/// through here.
pub fn display_item(item: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(item)
}
