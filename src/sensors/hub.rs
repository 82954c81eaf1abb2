//! Async driver that runs session commands against a [`Transport`].
//!
//! Connect attempts run on their own tokio tasks, but every result and frame
//! funnels back through a single channel, so the registry sees events one at a
//! time and in delivery order.

use crate::sensors::session::{SessionRegistry, TransportCommand};
use crate::sensors::transport::{Transport, TransportEvent};
use crate::sensors::types::{ConnectionState, SensorError, SensorEvent, SensorKind, SensorSnapshot};
use crossbeam::channel::Receiver;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Owns the session registry and the transport it drives.
pub struct SensorHub<T: Transport> {
    registry: SessionRegistry,
    transport: Arc<T>,
    /// Bound on one scan + connect + subscribe attempt
    attempt_timeout: Duration,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl<T: Transport> SensorHub<T> {
    /// Create a hub over the given transport.
    pub fn new(transport: T, attempt_timeout: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            registry: SessionRegistry::new(),
            transport: Arc::new(transport),
            attempt_timeout,
            event_tx,
            event_rx,
        }
    }

    /// Get an event receiver for sensor events.
    pub fn event_receiver(&mut self) -> Receiver<SensorEvent> {
        self.registry.event_receiver()
    }

    /// Enable a sensor kind. Must be called from within a tokio runtime.
    pub fn enable(&mut self, kind: SensorKind) {
        let commands = self.registry.enable(kind);
        self.execute(commands);
    }

    /// Disable a sensor kind, dropping its connection if any.
    pub fn disable(&mut self, kind: SensorKind) {
        let commands = self.registry.disable(kind);
        self.execute(commands);
    }

    pub fn state(&self, kind: SensorKind) -> ConnectionState {
        self.registry.state(kind)
    }

    pub fn snapshot(&self, kind: SensorKind) -> SensorSnapshot {
        self.registry.snapshot(kind)
    }

    /// Wait for the next transport event and dispatch it.
    pub async fn process_next(&mut self) {
        // The hub keeps a sender alive, so the channel never closes
        if let Some(event) = self.event_rx.recv().await {
            self.dispatch(event);
        }
    }

    /// Dispatch every event already queued without waiting. Returns the count.
    pub fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.event_rx.try_recv() {
            self.dispatch(event);
            count += 1;
        }
        count
    }

    /// Disable every sensor and wait for the disconnects to complete.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down SensorHub");

        for command in self.registry.shutdown() {
            if let TransportCommand::Disconnect { handle } = command {
                self.transport.disconnect(&handle).await;
            }
        }
    }

    fn dispatch(&mut self, event: TransportEvent) {
        let commands = self.registry.handle_event(event);
        self.execute(commands);
    }

    fn execute(&self, commands: Vec<TransportCommand>) {
        for command in commands {
            match command {
                TransportCommand::Connect { kind, generation } => {
                    let transport = self.transport.clone();
                    let event_tx = self.event_tx.clone();
                    let timeout = self.attempt_timeout;
                    tokio::spawn(async move {
                        Self::run_link(transport, kind, generation, timeout, event_tx).await;
                    });
                }
                TransportCommand::Disconnect { handle } => {
                    let transport = self.transport.clone();
                    tokio::spawn(async move {
                        transport.disconnect(&handle).await;
                    });
                }
            }
        }
    }

    /// Connect, subscribe, then forward frames until the stream ends.
    ///
    /// Connect and subscribe share one deadline. A connection that cannot be
    /// subscribed in time is released before the failure is reported.
    async fn run_link(
        transport: Arc<T>,
        kind: SensorKind,
        generation: u64,
        timeout: Duration,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let deadline = Instant::now() + timeout;
        let fail = |error: SensorError| {
            let _ = event_tx.send(TransportEvent::ConnectFailed {
                kind,
                generation,
                error,
            });
        };

        let handle = match tokio::time::timeout_at(deadline, transport.connect(kind)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(error)) => return fail(error),
            Err(_) => return fail(SensorError::ConnectionTimeout),
        };

        let mut frames = match tokio::time::timeout_at(deadline, transport.subscribe(&handle)).await
        {
            Ok(Ok(frames)) => frames,
            Ok(Err(error)) => {
                transport.disconnect(&handle).await;
                return fail(error);
            }
            Err(_) => {
                tracing::debug!("{} subscribe timed out, releasing {}", kind, handle.device_id);
                transport.disconnect(&handle).await;
                return fail(SensorError::ConnectionTimeout);
            }
        };

        let connected = TransportEvent::Connected {
            kind,
            generation,
            handle: handle.clone(),
        };
        if event_tx.send(connected).is_err() {
            transport.disconnect(&handle).await;
            return;
        }

        while let Some(frame) = frames.next().await {
            tracing::trace!("{} frame: {:02x?}", kind, frame);
            if event_tx
                .send(TransportEvent::Frame {
                    kind,
                    generation,
                    frame,
                })
                .is_err()
            {
                return;
            }
        }

        // Stream ended - peripheral disconnected
        let _ = event_tx.send(TransportEvent::Disconnected { kind, generation });
    }
}
