//! Sensor types and enums for BLE fitness sensors.

use crate::sensors::gatt::{
    CSC_MEASUREMENT_UUID, CSC_SERVICE_UUID, CYCLING_POWER_MEASUREMENT_UUID,
    CYCLING_POWER_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    HeartRateMeasurement,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Kind of fitness sensor. At most one session per kind is live at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Heart rate monitor
    HeartRate,
    /// Cycling speed and cadence sensor
    CadenceSpeed,
    /// Cycling power meter
    Power,
}

impl SensorKind {
    /// All supported kinds, in display order.
    pub const ALL: [SensorKind; 3] = [
        SensorKind::CadenceSpeed,
        SensorKind::HeartRate,
        SensorKind::Power,
    ];

    /// GATT service advertised by sensors of this kind.
    pub fn service_uuid(&self) -> Uuid {
        match self {
            SensorKind::HeartRate => HEART_RATE_SERVICE_UUID,
            SensorKind::CadenceSpeed => CSC_SERVICE_UUID,
            SensorKind::Power => CYCLING_POWER_SERVICE_UUID,
        }
    }

    /// Characteristic carrying the measurement notifications.
    pub fn measurement_uuid(&self) -> Uuid {
        match self {
            SensorKind::HeartRate => HEART_RATE_MEASUREMENT_UUID,
            SensorKind::CadenceSpeed => CSC_MEASUREMENT_UUID,
            SensorKind::Power => CYCLING_POWER_MEASUREMENT_UUID,
        }
    }

    /// Display unit for the published value.
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::HeartRate => "BPM",
            SensorKind::CadenceSpeed => "RPM",
            SensorKind::Power => "Watts",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::HeartRate => write!(f, "Heart Rate"),
            SensorKind::CadenceSpeed => write!(f, "Cadence"),
            SensorKind::Power => write!(f, "Power"),
        }
    }
}

/// Connection state of a sensor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    #[default]
    Idle,
    /// Connect/subscribe request outstanding
    Connecting,
    /// Subscribed and receiving notifications
    Streaming,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Streaming => write!(f, "Streaming"),
        }
    }
}

/// Opaque handle to a transport-level connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    /// Kind the connection was made for
    pub kind: SensorKind,
    /// Transport-specific device identifier
    pub device_id: String,
}

impl ConnectionHandle {
    pub fn new(kind: SensorKind, device_id: impl Into<String>) -> Self {
        Self {
            kind,
            device_id: device_id.into(),
        }
    }
}

/// A decoded value published to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Heart rate measurement, unsmoothed
    HeartRate(HeartRateMeasurement),
    /// Smoothed cadence, rounded to whole RPM
    Cadence { rpm: i64 },
    /// Instantaneous power plus the recent history trace (oldest first)
    Power { watts: i16, history: Vec<i16> },
}

impl Reading {
    /// The headline number shown for this reading.
    pub fn value(&self) -> f64 {
        match self {
            Reading::HeartRate(hr) => f64::from(hr.heart_rate),
            Reading::Cadence { rpm } => *rpm as f64,
            Reading::Power { watts, .. } => f64::from(*watts),
        }
    }
}

/// Events from the sensor system.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// Loading indicator turned on or off
    LoadingChanged { kind: SensorKind, loading: bool },
    /// Session connection state changed
    ConnectionStateChanged {
        kind: SensorKind,
        state: ConnectionState,
    },
    /// The sensor switched itself off (connect failure or remote disconnect)
    Deactivated { kind: SensorKind },
    /// New decoded value
    ValueUpdated { kind: SensorKind, reading: Reading },
}

/// Caller-observable state of one sensor kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    /// Connect request in flight
    pub is_loading: bool,
    /// Toggle state: enabled and not yet failed or disconnected
    pub is_active: bool,
    /// Most recent published value
    pub latest_value: Option<f64>,
    /// Recent history trace (power only)
    pub history: Option<Vec<f64>>,
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SensorError {
    /// Frame lacks bytes its own flags declare
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// No sensor of the requested kind was found
    #[error("No {0} sensor found")]
    SensorNotFound(SensorKind),

    /// Connection to sensor failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timed out
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// Sensor does not expose the measurement characteristic
    #[error("{0} measurement characteristic not found")]
    CharacteristicNotFound(SensorKind),

    /// Failed to subscribe to sensor notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Result of an attempt that was superseded
    #[error("Stale result for {kind} (generation {generation})")]
    StaleResult { kind: SensorKind, generation: u64 },

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
