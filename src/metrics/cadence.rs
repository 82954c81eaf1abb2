//! Crank cadence from cumulative CSC counters.

use crate::sensors::gatt::CscMeasurement;

/// Crank event time resolution (ticks per second).
pub const CRANK_TIME_TICKS_PER_SEC: f64 = 1024.0;

/// Full period of the 16-bit event time counter in seconds.
pub const CRANK_TIME_WRAP_SECS: f64 = 65536.0 / CRANK_TIME_TICKS_PER_SEC;

/// Compute cadence in RPM from two consecutive crank samples.
///
/// Returns 0 when the crank has not turned, without looking at the time
/// fields. A negative time delta means the event time counter wrapped and is
/// corrected by one full counter period. Two samples with revolutions but an
/// identical event time yield a non-finite result; callers must discard it.
pub fn cadence_rpm(older: &CscMeasurement, newer: &CscMeasurement) -> f64 {
    let delta_revs = newer.crank_revolutions.wrapping_sub(older.crank_revolutions);
    if delta_revs == 0 {
        return 0.0;
    }

    let mut delta_time =
        (f64::from(newer.crank_event_time) - f64::from(older.crank_event_time))
            / CRANK_TIME_TICKS_PER_SEC;
    if delta_time < 0.0 {
        delta_time += CRANK_TIME_WRAP_SECS;
    }

    let delta_minutes = delta_time / 60.0;
    f64::from(delta_revs) / delta_minutes
}
