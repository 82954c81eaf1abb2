//! In-memory transport for exercising the sensor hub without hardware.

use futures::channel::mpsc as frame_channel;
use futures::StreamExt;
use ridelink::sensors::transport::{FrameStream, Transport};
use ridelink::sensors::types::{ConnectionHandle, SensorError, SensorKind};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};

#[derive(Default)]
struct MockState {
    /// Kinds whose connect attempt fails
    failing: HashSet<SensorKind>,
    /// Kinds whose subscribe fails after a successful connect
    failing_subscribe: HashSet<SensorKind>,
    /// Kinds whose subscribe never completes
    stalled_subscribe: HashSet<SensorKind>,
    /// Frame feeds of subscribed sensors
    feeds: HashMap<SensorKind, frame_channel::UnboundedSender<Vec<u8>>>,
    /// Connect calls seen, in order
    connects: Vec<SensorKind>,
}

/// Mock transport; clones share state so tests can drive it after handing it to the hub.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    /// Connect waits for a permit when gated
    gate: Option<Arc<Semaphore>>,
    disconnect_tx: mpsc::UnboundedSender<ConnectionHandle>,
}

impl MockTransport {
    /// Create a transport and the receiver of its disconnect calls.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectionHandle>) {
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let transport = Self {
            state: Arc::new(Mutex::new(MockState::default())),
            gate: None,
            disconnect_tx,
        };
        (transport, disconnect_rx)
    }

    /// Hold every connect until `release` is called.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn fail_connect(&self, kind: SensorKind) {
        self.state.lock().unwrap().failing.insert(kind);
    }

    pub fn fail_subscribe(&self, kind: SensorKind) {
        self.state.lock().unwrap().failing_subscribe.insert(kind);
    }

    pub fn stall_subscribe(&self, kind: SensorKind) {
        self.state.lock().unwrap().stalled_subscribe.insert(kind);
    }

    pub fn connects(&self) -> Vec<SensorKind> {
        self.state.lock().unwrap().connects.clone()
    }

    /// Deliver a notification to a subscribed sensor.
    pub fn push_frame(&self, kind: SensorKind, frame: &[u8]) {
        let state = self.state.lock().unwrap();
        let feed = state.feeds.get(&kind).expect("sensor not subscribed");
        feed.unbounded_send(frame.to_vec()).unwrap();
    }

    /// Simulate the peripheral going away.
    pub fn drop_link(&self, kind: SensorKind) {
        self.state.lock().unwrap().feeds.remove(&kind);
    }
}

impl Transport for MockTransport {
    async fn connect(&self, kind: SensorKind) -> Result<ConnectionHandle, SensorError> {
        self.state.lock().unwrap().connects.push(kind);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if self.state.lock().unwrap().failing.contains(&kind) {
            return Err(SensorError::SensorNotFound(kind));
        }
        Ok(ConnectionHandle::new(kind, format!("mock-{:?}", kind)))
    }

    async fn subscribe(&self, handle: &ConnectionHandle) -> Result<FrameStream, SensorError> {
        let stalled = self.state.lock().unwrap().stalled_subscribe.contains(&handle.kind);
        if stalled {
            futures::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_subscribe.contains(&handle.kind) {
            return Err(SensorError::CharacteristicNotFound(handle.kind));
        }
        let (tx, rx) = frame_channel::unbounded();
        state.feeds.insert(handle.kind, tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self, handle: &ConnectionHandle) {
        self.state.lock().unwrap().feeds.remove(&handle.kind);
        let _ = self.disconnect_tx.send(handle.clone());
    }
}
