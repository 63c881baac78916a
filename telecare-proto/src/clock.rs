//! Wall-clock stamps attached to relayed chat messages.

use chrono::Timelike;

/// `strftime` pattern for message timestamps: 24-hour `HH:MM`.
pub const CLOCK_FORMAT: &str = "%H:%M";

/// Returns the current local time formatted as `HH:MM`.
#[must_use]
pub fn now() -> String {
    format(&chrono::Local::now())
}

/// Formats any time-of-day value as `HH:MM`.
#[must_use]
pub fn format(time: &impl Timelike) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

/// Returns `true` if `stamp` is a valid 24-hour `HH:MM` string.
#[must_use]
pub fn is_valid(stamp: &str) -> bool {
    stamp.len() == 5 && chrono::NaiveTime::parse_from_str(stamp, CLOCK_FORMAT).is_ok()
}
