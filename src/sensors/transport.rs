//! Boundary between the session core and the radio link.

use crate::sensors::types::{ConnectionHandle, SensorError, SensorKind};
use futures::stream::BoxStream;
use std::future::Future;

/// Raw measurement frames from a subscribed characteristic.
///
/// The stream ending means the peripheral disconnected.
pub type FrameStream = BoxStream<'static, Vec<u8>>;

/// Connect, subscribe and disconnect capabilities consumed by the sensor hub.
pub trait Transport: Send + Sync + 'static {
    /// Find and connect to a sensor of the given kind.
    fn connect(
        &self,
        kind: SensorKind,
    ) -> impl Future<Output = Result<ConnectionHandle, SensorError>> + Send;

    /// Subscribe to measurement notifications on a connected sensor.
    fn subscribe(
        &self,
        handle: &ConnectionHandle,
    ) -> impl Future<Output = Result<FrameStream, SensorError>> + Send;

    /// Drop a connection. Unknown handles are ignored.
    fn disconnect(&self, handle: &ConnectionHandle) -> impl Future<Output = ()> + Send;
}

/// Result of transport work, tagged with the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connected and subscribed
    Connected {
        kind: SensorKind,
        generation: u64,
        handle: ConnectionHandle,
    },
    /// Device selection, connection, discovery or subscription failed
    ConnectFailed {
        kind: SensorKind,
        generation: u64,
        error: SensorError,
    },
    /// Measurement notification
    Frame {
        kind: SensorKind,
        generation: u64,
        frame: Vec<u8>,
    },
    /// Link lost
    Disconnected { kind: SensorKind, generation: u64 },
}

impl TransportEvent {
    pub fn kind(&self) -> SensorKind {
        match self {
            TransportEvent::Connected { kind, .. }
            | TransportEvent::ConnectFailed { kind, .. }
            | TransportEvent::Frame { kind, .. }
            | TransportEvent::Disconnected { kind, .. } => *kind,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            TransportEvent::Connected { generation, .. }
            | TransportEvent::ConnectFailed { generation, .. }
            | TransportEvent::Frame { generation, .. }
            | TransportEvent::Disconnected { generation, .. } => *generation,
        }
    }
}
