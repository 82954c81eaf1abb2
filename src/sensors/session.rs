//! Per-kind sensor session state machine.
//!
//! Sessions perform no I/O. Each operation returns the [`TransportCommand`]s
//! the host has to run, and transport results come back tagged with the
//! generation of the attempt that produced them. Results from a superseded
//! generation are dropped so a late connect cannot resurrect a disabled
//! session.
//!
//! ```text
//! Idle --enable--> Connecting --connected--> Streaming
//!   ^                  |                         |
//!   +---- failure -----+------ disconnect -------+
//! ```

use crate::metrics::cadence::cadence_rpm;
use crate::metrics::smoothing::{cadence_window, power_history_window, SmoothingWindow};
use crate::sensors::gatt::{decode_csc, decode_heart_rate, decode_power, CscMeasurement};
use crate::sensors::transport::TransportEvent;
use crate::sensors::types::{
    ConnectionHandle, ConnectionState, Reading, SensorError, SensorEvent, SensorKind,
    SensorSnapshot,
};
use crossbeam::channel::{Receiver, Sender};
use std::collections::HashMap;

/// Work the host must perform on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    /// Connect to a sensor of `kind` and subscribe to its measurements
    Connect { kind: SensorKind, generation: u64 },
    /// Drop a connection (idempotent)
    Disconnect { handle: ConnectionHandle },
}

/// Kind-specific processing between decoded frames and published values.
#[derive(Debug, Clone)]
enum Pipeline {
    HeartRate,
    Cadence {
        previous: Option<CscMeasurement>,
        window: SmoothingWindow<f64>,
    },
    Power {
        window: SmoothingWindow<i16>,
    },
}

impl Pipeline {
    fn for_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::HeartRate => Pipeline::HeartRate,
            SensorKind::CadenceSpeed => Pipeline::Cadence {
                previous: None,
                window: cadence_window(),
            },
            SensorKind::Power => Pipeline::Power {
                window: power_history_window(),
            },
        }
    }

    fn process(&mut self, frame: &[u8]) -> Result<Option<Reading>, SensorError> {
        match self {
            Pipeline::HeartRate => Ok(Some(Reading::HeartRate(decode_heart_rate(frame)?))),
            Pipeline::Cadence { previous, window } => {
                let sample = decode_csc(frame)?;
                if !sample.has_crank_data() {
                    // Wheel-only frames leave the previous crank sample in place
                    tracing::trace!("CSC frame without crank data");
                    return Ok(None);
                }

                let Some(older) = previous.replace(sample) else {
                    return Ok(None);
                };

                let rpm = cadence_rpm(&older, &sample);
                if !rpm.is_finite() {
                    tracing::debug!("Discarding cadence sample with zero time delta");
                    return Ok(None);
                }

                let snapshot = window.push(rpm);
                if !snapshot.is_full {
                    return Ok(None);
                }
                Ok(snapshot.mean().map(|rpm| Reading::Cadence { rpm }))
            }
            Pipeline::Power { window } => {
                let watts = decode_power(frame)?.instantaneous_power;
                let snapshot = window.push(watts);
                Ok(Some(Reading::Power {
                    watts,
                    history: snapshot.values,
                }))
            }
        }
    }

    fn history(&self) -> Option<Vec<f64>> {
        match self {
            Pipeline::Power { window } => {
                Some(window.values().into_iter().map(f64::from).collect())
            }
            _ => None,
        }
    }
}

/// Live connect/stream lifecycle of one sensor kind.
#[derive(Debug, Clone)]
pub struct SensorSession {
    kind: SensorKind,
    /// Generation of the current (or last) connect attempt
    generation: u64,
    state: ConnectionState,
    /// Transport connection, owned exclusively by this session
    handle: Option<ConnectionHandle>,
    is_loading: bool,
    is_active: bool,
    latest_value: Option<f64>,
    pipeline: Pipeline,
    /// Events produced since the last drain
    outbox: Vec<SensorEvent>,
}

impl SensorSession {
    /// Create an idle session.
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            generation: 0,
            state: ConnectionState::Idle,
            handle: None,
            is_loading: false,
            is_active: false,
            latest_value: None,
            pipeline: Pipeline::for_kind(kind),
            outbox: Vec::new(),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    /// Caller-observable state.
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            is_loading: self.is_loading,
            is_active: self.is_active,
            latest_value: self.latest_value,
            history: self.pipeline.history(),
        }
    }

    /// Take the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<SensorEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Start a connect attempt tagged with `generation`.
    ///
    /// Returns `None` when the session is not idle.
    pub fn enable(&mut self, generation: u64) -> Option<TransportCommand> {
        if self.state != ConnectionState::Idle {
            tracing::debug!("{} already {}, ignoring enable", self.kind, self.state);
            return None;
        }

        tracing::info!("Enabling {} sensor (generation {})", self.kind, generation);

        self.generation = generation;
        self.pipeline = Pipeline::for_kind(self.kind);
        self.latest_value = None;
        self.is_active = true;
        self.set_loading(true);
        self.set_state(ConnectionState::Connecting);

        Some(TransportCommand::Connect {
            kind: self.kind,
            generation,
        })
    }

    /// Tear the session down. Returns the disconnect for any owned connection.
    pub fn disable(&mut self) -> Option<TransportCommand> {
        tracing::info!("Disabling {} sensor", self.kind);

        self.is_active = false;
        self.set_loading(false);
        self.set_state(ConnectionState::Idle);

        self.handle
            .take()
            .map(|handle| TransportCommand::Disconnect { handle })
    }

    /// Connect and subscribe succeeded.
    pub fn on_connected(
        &mut self,
        generation: u64,
        handle: ConnectionHandle,
    ) -> Result<(), SensorError> {
        self.check_current(generation, &[ConnectionState::Connecting])?;

        tracing::info!("{} sensor streaming from {}", self.kind, handle.device_id);

        self.handle = Some(handle);
        self.set_loading(false);
        self.set_state(ConnectionState::Streaming);
        Ok(())
    }

    /// Any connect-phase step failed.
    pub fn on_connect_failed(
        &mut self,
        generation: u64,
        error: &SensorError,
    ) -> Result<(), SensorError> {
        self.check_current(generation, &[ConnectionState::Connecting])?;

        tracing::warn!("{} sensor connect failed: {}", self.kind, error);

        self.deactivate();
        Ok(())
    }

    /// The transport reported the link gone. No automatic reconnect.
    pub fn on_disconnected(&mut self, generation: u64) -> Result<(), SensorError> {
        self.check_current(
            generation,
            &[ConnectionState::Connecting, ConnectionState::Streaming],
        )?;

        tracing::info!("{} sensor disconnected", self.kind);

        self.handle = None;
        self.deactivate();
        Ok(())
    }

    /// Decode one frame and publish the resulting value, if any.
    pub fn on_frame(
        &mut self,
        generation: u64,
        frame: &[u8],
    ) -> Result<Option<Reading>, SensorError> {
        self.check_current(generation, &[ConnectionState::Streaming])?;

        let Some(reading) = self.pipeline.process(frame)? else {
            return Ok(None);
        };

        self.latest_value = Some(reading.value());
        self.outbox.push(SensorEvent::ValueUpdated {
            kind: self.kind,
            reading: reading.clone(),
        });
        Ok(Some(reading))
    }

    fn check_current(
        &self,
        generation: u64,
        expected: &[ConnectionState],
    ) -> Result<(), SensorError> {
        if generation != self.generation || !expected.contains(&self.state) {
            return Err(SensorError::StaleResult {
                kind: self.kind,
                generation,
            });
        }
        Ok(())
    }

    fn deactivate(&mut self) {
        self.is_active = false;
        self.set_loading(false);
        self.outbox.push(SensorEvent::Deactivated { kind: self.kind });
        self.set_state(ConnectionState::Idle);
    }

    fn set_loading(&mut self, loading: bool) {
        if self.is_loading != loading {
            self.is_loading = loading;
            self.outbox.push(SensorEvent::LoadingChanged {
                kind: self.kind,
                loading,
            });
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.outbox.push(SensorEvent::ConnectionStateChanged {
                kind: self.kind,
                state,
            });
        }
    }
}

/// Owns at most one [`SensorSession`] per kind and issues connect generations.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SensorKind, SensorSession>,
    /// Last issued generation; shared across kinds and never reused
    last_generation: u64,
    /// Channel for sending sensor events
    event_tx: Option<Sender<SensorEvent>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an event receiver for sensor events.
    pub fn event_receiver(&mut self) -> Receiver<SensorEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.event_tx = Some(tx);
        rx
    }

    /// Enable a sensor kind. A no-op while already connecting or streaming.
    pub fn enable(&mut self, kind: SensorKind) -> Vec<TransportCommand> {
        let session = self
            .sessions
            .entry(kind)
            .or_insert_with(|| SensorSession::new(kind));
        if session.state() != ConnectionState::Idle {
            tracing::debug!("{} already {}, ignoring enable", kind, session.state());
            return Vec::new();
        }

        self.last_generation += 1;
        let command = session.enable(self.last_generation);
        self.flush(kind);
        command.into_iter().collect()
    }

    /// Disable a sensor kind and discard its session.
    pub fn disable(&mut self, kind: SensorKind) -> Vec<TransportCommand> {
        let Some(mut session) = self.sessions.remove(&kind) else {
            return Vec::new();
        };
        let command = session.disable();
        self.send_all(session.drain_events());
        command.into_iter().collect()
    }

    /// Disable every live session.
    pub fn shutdown(&mut self) -> Vec<TransportCommand> {
        let kinds: Vec<SensorKind> = self.sessions.keys().copied().collect();
        kinds
            .into_iter()
            .flat_map(|kind| self.disable(kind))
            .collect()
    }

    /// Route a transport result to its session.
    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<TransportCommand> {
        let kind = event.kind();
        let generation = event.generation();

        let Some(session) = self.sessions.get_mut(&kind) else {
            tracing::debug!("No {} session for generation {}, dropping event", kind, generation);
            return Self::release_orphan(event);
        };

        let result = match &event {
            TransportEvent::Connected { handle, .. } => {
                session.on_connected(generation, handle.clone())
            }
            TransportEvent::ConnectFailed { error, .. } => {
                session.on_connect_failed(generation, error)
            }
            TransportEvent::Disconnected { .. } => session.on_disconnected(generation),
            TransportEvent::Frame { frame, .. } => session.on_frame(generation, frame).map(|_| ()),
        };
        self.flush(kind);

        match result {
            Ok(()) => Vec::new(),
            Err(SensorError::StaleResult { .. }) => {
                tracing::debug!("Ignoring stale {} event (generation {})", kind, generation);
                Self::release_orphan(event)
            }
            Err(e) => {
                tracing::debug!("Dropping {} frame: {}", kind, e);
                Vec::new()
            }
        }
    }

    /// Current state of a kind; `Idle` when no session exists.
    pub fn state(&self, kind: SensorKind) -> ConnectionState {
        self.sessions
            .get(&kind)
            .map(|s| s.state())
            .unwrap_or_default()
    }

    /// Caller-observable state of a kind.
    pub fn snapshot(&self, kind: SensorKind) -> SensorSnapshot {
        self.sessions
            .get(&kind)
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    pub fn session(&self, kind: SensorKind) -> Option<&SensorSession> {
        self.sessions.get(&kind)
    }

    /// A connection delivered to no live session must still be closed.
    fn release_orphan(event: TransportEvent) -> Vec<TransportCommand> {
        match event {
            TransportEvent::Connected { handle, .. } => {
                vec![TransportCommand::Disconnect { handle }]
            }
            _ => Vec::new(),
        }
    }

    fn flush(&mut self, kind: SensorKind) {
        let events = self
            .sessions
            .get_mut(&kind)
            .map(|s| s.drain_events())
            .unwrap_or_default();
        self.send_all(events);
    }

    fn send_all(&self, events: Vec<SensorEvent>) {
        if let Some(tx) = &self.event_tx {
            for event in events {
                let _ = tx.send(event);
            }
        }
    }
}
