//! End-to-end session lifecycle through the hub and a mock transport.

use super::sensor_mock::MockTransport;
use ridelink::sensors::hub::SensorHub;
use ridelink::sensors::types::{ConnectionState, Reading, SensorEvent, SensorKind};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Process hub events until `done` holds, failing after a bounded number of steps.
async fn run_until(hub: &mut SensorHub<MockTransport>, done: impl Fn(&SensorHub<MockTransport>) -> bool) {
    for _ in 0..100 {
        if done(hub) {
            return;
        }
        tokio::time::timeout(TIMEOUT, hub.process_next())
            .await
            .expect("hub stalled");
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_heart_rate_stream() {
    let (transport, _disconnects) = MockTransport::new();
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);
    let events = hub.event_receiver();

    hub.enable(SensorKind::HeartRate);
    assert!(hub.snapshot(SensorKind::HeartRate).is_loading);

    run_until(&mut hub, |h| h.state(SensorKind::HeartRate) == ConnectionState::Streaming).await;
    assert!(!hub.snapshot(SensorKind::HeartRate).is_loading);
    assert!(hub.snapshot(SensorKind::HeartRate).is_active);

    transport.push_frame(SensorKind::HeartRate, &[0x00, 0x50]);
    run_until(&mut hub, |h| h.snapshot(SensorKind::HeartRate).latest_value.is_some()).await;
    assert_eq!(hub.snapshot(SensorKind::HeartRate).latest_value, Some(80.0));

    let updates: Vec<_> = events
        .try_iter()
        .filter_map(|e| match e {
            SensorEvent::ValueUpdated {
                reading: Reading::HeartRate(hr),
                ..
            } => Some(hr.heart_rate),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![80]);
}

#[tokio::test]
async fn test_double_enable_issues_single_connect() {
    let (transport, _disconnects) = MockTransport::new();
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);

    hub.enable(SensorKind::Power);
    hub.enable(SensorKind::Power);
    run_until(&mut hub, |h| h.state(SensorKind::Power) == ConnectionState::Streaming).await;
    hub.enable(SensorKind::Power);
    tokio::task::yield_now().await;

    assert_eq!(transport.connects(), vec![SensorKind::Power]);
}

#[tokio::test]
async fn test_connect_failure_toggles_off() {
    let (transport, _disconnects) = MockTransport::new();
    transport.fail_connect(SensorKind::CadenceSpeed);
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);
    let events = hub.event_receiver();

    hub.enable(SensorKind::CadenceSpeed);
    run_until(&mut hub, |h| !h.snapshot(SensorKind::CadenceSpeed).is_active).await;

    assert_eq!(hub.state(SensorKind::CadenceSpeed), ConnectionState::Idle);
    assert!(!hub.snapshot(SensorKind::CadenceSpeed).is_loading);
    assert!(events.try_iter().any(|e| e
        == SensorEvent::Deactivated {
            kind: SensorKind::CadenceSpeed
        }));
}

#[tokio::test]
async fn test_subscribe_failure_disconnects_and_toggles_off() {
    let (transport, mut disconnects) = MockTransport::new();
    transport.fail_subscribe(SensorKind::Power);
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);

    hub.enable(SensorKind::Power);
    run_until(&mut hub, |h| !h.snapshot(SensorKind::Power).is_active).await;

    assert_eq!(hub.state(SensorKind::Power), ConnectionState::Idle);
    let handle = tokio::time::timeout(TIMEOUT, disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.kind, SensorKind::Power);
}

#[tokio::test]
async fn test_subscribe_timeout_releases_connection() {
    let (transport, mut disconnects) = MockTransport::new();
    transport.stall_subscribe(SensorKind::Power);
    let mut hub = SensorHub::new(transport.clone(), Duration::from_millis(100));
    let events = hub.event_receiver();

    hub.enable(SensorKind::Power);
    run_until(&mut hub, |h| !h.snapshot(SensorKind::Power).is_active).await;

    assert_eq!(hub.state(SensorKind::Power), ConnectionState::Idle);
    assert!(events.try_iter().any(|e| e
        == SensorEvent::Deactivated {
            kind: SensorKind::Power
        }));
    assert_eq!(transport.connects(), vec![SensorKind::Power]);

    // The connected handle must not outlive the failed attempt
    let handle = tokio::time::timeout(TIMEOUT, disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.kind, SensorKind::Power);
}

#[tokio::test]
async fn test_late_connect_after_disable_stays_idle() {
    let (transport, mut disconnects) = MockTransport::new();
    let (transport, gate) = transport.gated();
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);

    hub.enable(SensorKind::HeartRate);
    hub.disable(SensorKind::HeartRate);
    assert_eq!(hub.state(SensorKind::HeartRate), ConnectionState::Idle);

    gate.add_permits(1);
    tokio::time::timeout(TIMEOUT, hub.process_next())
        .await
        .expect("connect result not delivered");

    assert_eq!(hub.state(SensorKind::HeartRate), ConnectionState::Idle);
    assert!(!hub.snapshot(SensorKind::HeartRate).is_active);

    // The orphaned connection is released
    let handle = tokio::time::timeout(TIMEOUT, disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.kind, SensorKind::HeartRate);
}

#[tokio::test]
async fn test_remote_disconnect_requires_reenable() {
    let (transport, _disconnects) = MockTransport::new();
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);
    let events = hub.event_receiver();

    hub.enable(SensorKind::HeartRate);
    run_until(&mut hub, |h| h.state(SensorKind::HeartRate) == ConnectionState::Streaming).await;

    transport.drop_link(SensorKind::HeartRate);
    run_until(&mut hub, |h| h.state(SensorKind::HeartRate) == ConnectionState::Idle).await;

    assert!(!hub.snapshot(SensorKind::HeartRate).is_active);
    assert!(events.try_iter().any(|e| e
        == SensorEvent::Deactivated {
            kind: SensorKind::HeartRate
        }));
    assert_eq!(transport.connects().len(), 1);

    hub.enable(SensorKind::HeartRate);
    run_until(&mut hub, |h| h.state(SensorKind::HeartRate) == ConnectionState::Streaming).await;
    assert_eq!(transport.connects().len(), 2);
}

#[tokio::test]
async fn test_cadence_and_power_pipelines() {
    let (transport, _disconnects) = MockTransport::new();
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);

    hub.enable(SensorKind::CadenceSpeed);
    hub.enable(SensorKind::Power);
    run_until(&mut hub, |h| {
        h.state(SensorKind::CadenceSpeed) == ConnectionState::Streaming
            && h.state(SensorKind::Power) == ConnectionState::Streaming
    })
    .await;

    // 90 RPM: 3 revs every 2 s
    for i in 1..=5u16 {
        let mut frame = vec![0x02];
        frame.extend_from_slice(&(i * 3).to_le_bytes());
        frame.extend_from_slice(&(i * 2048).to_le_bytes());
        transport.push_frame(SensorKind::CadenceSpeed, &frame);
    }
    run_until(&mut hub, |h| h.snapshot(SensorKind::CadenceSpeed).latest_value.is_some()).await;
    assert_eq!(hub.snapshot(SensorKind::CadenceSpeed).latest_value, Some(90.0));

    transport.push_frame(SensorKind::Power, &[0x00, 0xF4, 0x00]);
    run_until(&mut hub, |h| h.snapshot(SensorKind::Power).latest_value.is_some()).await;
    let snapshot = hub.snapshot(SensorKind::Power);
    assert_eq!(snapshot.latest_value, Some(244.0));
    let history = snapshot.history.unwrap();
    assert_eq!(history.len(), 10);
    assert_eq!(history[9], 244.0);
}

#[tokio::test]
async fn test_disable_streaming_disconnects() {
    let (transport, mut disconnects) = MockTransport::new();
    let mut hub = SensorHub::new(transport.clone(), TIMEOUT);

    hub.enable(SensorKind::Power);
    run_until(&mut hub, |h| h.state(SensorKind::Power) == ConnectionState::Streaming).await;

    hub.disable(SensorKind::Power);
    assert_eq!(hub.state(SensorKind::Power), ConnectionState::Idle);

    let handle = tokio::time::timeout(TIMEOUT, disconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.kind, SensorKind::Power);

    // Disabling again is a no-op
    hub.disable(SensorKind::Power);
}
