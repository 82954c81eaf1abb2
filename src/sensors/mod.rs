//! Sensor module for BLE frame decoding and session management.

pub mod ble;
pub mod gatt;
pub mod hub;
pub mod session;
pub mod transport;
pub mod types;

pub use ble::BleTransport;
pub use gatt::{
    decode_csc, decode_heart_rate, decode_power, CscMeasurement, HeartRateMeasurement,
    PowerMeasurement,
};
pub use hub::SensorHub;
pub use session::{SensorSession, SessionRegistry, TransportCommand};
pub use transport::{FrameStream, Transport, TransportEvent};
pub use types::{
    ConnectionHandle, ConnectionState, Reading, SensorError, SensorEvent, SensorKind,
    SensorSnapshot,
};
