//! Unit tests for crank cadence computation.

use ridelink::metrics::cadence::{cadence_rpm, CRANK_TIME_WRAP_SECS};
use ridelink::sensors::gatt::CscMeasurement;

fn sample(revs: u16, time: u16) -> CscMeasurement {
    CscMeasurement {
        crank_revolutions: revs,
        crank_event_time: time,
    }
}

#[test]
fn test_zero_delta_revs_is_zero_for_any_time() {
    for (older_time, newer_time) in [(0, 0), (100, 5000), (65000, 100), (1024, 1024)] {
        let rpm = cadence_rpm(&sample(77, older_time), &sample(77, newer_time));
        assert_eq!(rpm, 0.0);
    }
}

#[test]
fn test_wraparound_yields_positive_finite_rpm() {
    let older = sample(10, 65000);
    let newer = sample(15, 100);

    let rpm = cadence_rpm(&older, &newer);

    let delta_secs = (100.0 - 65000.0) / 1024.0 + CRANK_TIME_WRAP_SECS;
    assert!(rpm.is_finite());
    assert!(rpm > 0.0);
    assert!((rpm - 5.0 / (delta_secs / 60.0)).abs() < 1e-6);
}

#[test]
fn test_typical_cadence() {
    // 2 revs in 1.5 s = 80 RPM
    let rpm = cadence_rpm(&sample(100, 2048), &sample(102, 2048 + 1536));
    assert!((rpm - 80.0).abs() < 1e-9);
}
