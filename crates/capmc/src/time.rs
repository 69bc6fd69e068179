// SPDX-License-Identifier: Apache-2.0

//! Telemetry timestamp handling.

use chrono::Timelike;

/// Converts a power agent wall-clock string such as
/// `"2015-02-19 15:50:00.581552-06"` to microseconds since local midnight.
///
/// The date and timezone fields are discarded by contract: the estimator
/// only needs same-day deltas and handles the midnight wrap itself.
pub fn time_of_day_usec(timestamp: &str) -> Option<u64> {
    let (_date, clock) = timestamp.split_once(' ')?;
    // The zone suffix is "-06"-style (or "+05:30"); cut at the last sign.
    let clock = match clock.rfind(['-', '+']) {
        Some(i) if i > 0 => &clock[..i],
        _ => clock,
    };
    let time = chrono::NaiveTime::parse_from_str(clock, "%H:%M:%S%.f").ok()?;
    Some(
        u64::from(time.num_seconds_from_midnight()) * 1_000_000
            + u64::from(time.nanosecond() / 1_000),
    )
}
