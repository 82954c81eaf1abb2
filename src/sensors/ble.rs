//! btleplug-backed [`Transport`] for heart rate, CSC and cycling power sensors.

use crate::sensors::transport::{FrameStream, Transport};
use crate::sensors::types::{ConnectionHandle, SensorError, SensorKind};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::oneshot;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How often the peripheral list is polled while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A connected peripheral and the signal that ends its frame stream.
struct Link {
    peripheral: Peripheral,
    /// Dropping or firing this ends the subscribed frame stream
    closed: Option<oneshot::Sender<()>>,
}

/// Per-handle links over possibly shared peripherals.
#[derive(Debug)]
struct LinkTable<L> {
    links: HashMap<ConnectionHandle, L>,
}

impl<L> Default for LinkTable<L> {
    fn default() -> Self {
        Self {
            links: HashMap::new(),
        }
    }
}

impl<L> LinkTable<L> {
    fn insert(&mut self, handle: ConnectionHandle, link: L) {
        self.links.insert(handle, link);
    }

    fn get(&self, handle: &ConnectionHandle) -> Option<&L> {
        self.links.get(handle)
    }

    fn get_mut(&mut self, handle: &ConnectionHandle) -> Option<&mut L> {
        self.links.get_mut(handle)
    }

    /// Whether any kind still holds a link to `device_id`.
    fn holds_device(&self, device_id: &str) -> bool {
        self.links.keys().any(|h| h.device_id == device_id)
    }

    /// Remove one kind's link. The flag tells whether the device is still in use.
    fn release(&mut self, handle: &ConnectionHandle) -> Option<(L, bool)> {
        let link = self.links.remove(handle)?;
        Some((link, self.holds_device(&handle.device_id)))
    }

    /// Forget every link to a device that went away. Returns how many were dropped.
    fn drop_device(&mut self, device_id: &str) -> usize {
        let before = self.links.len();
        self.links.retain(|h, _| h.device_id != device_id);
        before - self.links.len()
    }
}

/// Number of connect attempts sharing the adapter scan.
#[derive(Debug, Default)]
struct ScanRefs(usize);

impl ScanRefs {
    /// Returns true when the caller is first and must start the scan.
    fn join(&mut self) -> bool {
        self.0 += 1;
        self.0 == 1
    }

    /// Returns true when the caller was last and must stop the scan.
    fn leave(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        self.0 == 0
    }
}

/// BLE transport selecting the first sensor that advertises the wanted service.
///
/// One peripheral may serve several kinds (power meters often expose CSC as
/// well), so links are keyed per handle and the radio link is only dropped
/// once no kind holds it.
pub struct BleTransport {
    /// BLE adapter
    adapter: Adapter,
    /// How long to scan for a matching sensor
    scan_timeout: Duration,
    /// Live links, one per (kind, device)
    links: Arc<Mutex<LinkTable<Link>>>,
    /// Attempts currently scanning
    scans: Mutex<ScanRefs>,
}

impl BleTransport {
    /// Initialize the first BLE adapter and start watching for disconnects.
    pub async fn initialize(scan_timeout: Duration) -> Result<Self, SensorError> {
        tracing::info!("Initializing BLE transport");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        let links = Arc::new(Mutex::new(LinkTable::default()));

        let events = adapter
            .events()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;
        let watched = links.clone();
        tokio::spawn(async move {
            Self::watch_disconnects(events, watched).await;
        });

        tracing::info!("BLE adapter initialized");

        Ok(Self {
            adapter,
            scan_timeout,
            links,
            scans: Mutex::new(ScanRefs::default()),
        })
    }

    /// End the frame stream of any peripheral the adapter reports as gone.
    async fn watch_disconnects(
        mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
        links: Arc<Mutex<LinkTable<Link>>>,
    ) {
        while let Some(event) = events.next().await {
            if let CentralEvent::DeviceDisconnected(id) = event {
                let device_id = id.to_string();
                if links.lock().await.drop_device(&device_id) > 0 {
                    tracing::info!("Peripheral {} disconnected", device_id);
                }
            }
        }
    }

    /// Join the shared adapter scan, starting it if nobody else is scanning.
    ///
    /// The filter covers every supported service so concurrent attempts for
    /// different kinds can share one scan.
    async fn begin_scan(&self) -> Result<(), SensorError> {
        let mut scans = self.scans.lock().await;
        if scans.join() {
            let scan_filter = ScanFilter {
                services: SensorKind::ALL.iter().map(|k| k.service_uuid()).collect(),
            };
            if let Err(e) = self.adapter.start_scan(scan_filter).await {
                scans.leave();
                return Err(SensorError::BleError(e.to_string()));
            }
        }
        Ok(())
    }

    /// Leave the shared scan, stopping it when this was the last attempt.
    async fn end_scan(&self) {
        let mut scans = self.scans.lock().await;
        if scans.leave() {
            if let Err(e) = self.adapter.stop_scan().await {
                tracing::debug!("Failed to stop scan: {}", e);
            }
        }
    }

    /// Scan until a peripheral advertising the kind's service shows up.
    async fn find_peripheral(&self, kind: SensorKind) -> Result<Peripheral, SensorError> {
        tracing::info!("Scanning for {} sensor", kind);

        self.begin_scan().await?;

        let deadline = Instant::now() + self.scan_timeout;
        let found = loop {
            match self.first_advertising(kind).await {
                Ok(Some(peripheral)) => break Ok(peripheral),
                Ok(None) if Instant::now() >= deadline => {
                    break Err(SensorError::SensorNotFound(kind))
                }
                Ok(None) => tokio::time::sleep(SCAN_POLL_INTERVAL).await,
                Err(e) => break Err(e),
            }
        };

        self.end_scan().await;

        found
    }

    async fn first_advertising(&self, kind: SensorKind) -> Result<Option<Peripheral>, SensorError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| SensorError::BleError(e.to_string()))?;

        let service = kind.service_uuid();
        for peripheral in peripherals {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            if properties.services.contains(&service) {
                tracing::debug!(
                    "Found {} sensor {:?} ({})",
                    kind,
                    properties.local_name,
                    peripheral.id()
                );
                return Ok(Some(peripheral));
            }
        }

        Ok(None)
    }
}

impl Transport for BleTransport {
    async fn connect(&self, kind: SensorKind) -> Result<ConnectionHandle, SensorError> {
        let peripheral = self.find_peripheral(kind).await?;
        let device_id = peripheral.id().to_string();
        let handle = ConnectionHandle::new(kind, device_id.clone());

        let shared = self.links.lock().await.holds_device(&device_id);
        if shared {
            tracing::info!("Reusing connection to {} for {} sensor", device_id, kind);
        } else {
            tracing::info!("Connecting to {} sensor: {}", kind, device_id);

            peripheral
                .connect()
                .await
                .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

            if let Err(e) = peripheral.discover_services().await {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    tracing::debug!("Disconnect after failed discovery: {}", disconnect_err);
                }
                return Err(SensorError::ConnectionFailed(e.to_string()));
            }
        }

        self.links.lock().await.insert(
            handle.clone(),
            Link {
                peripheral,
                closed: None,
            },
        );

        Ok(handle)
    }

    async fn subscribe(&self, handle: &ConnectionHandle) -> Result<FrameStream, SensorError> {
        let peripheral = self
            .links
            .lock()
            .await
            .get(handle)
            .map(|link| link.peripheral.clone())
            .ok_or_else(|| {
                SensorError::SubscriptionFailed(format!("{} is not connected", handle.device_id))
            })?;

        let uuid = handle.kind.measurement_uuid();
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(SensorError::CharacteristicNotFound(handle.kind))?;

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;

        tracing::debug!("Subscribed to characteristic: {}", uuid);

        let (closed_tx, closed_rx) = oneshot::channel();
        if let Some(link) = self.links.lock().await.get_mut(handle) {
            link.closed = Some(closed_tx);
        }

        let frames = notifications
            .filter_map(move |notification| {
                futures::future::ready((notification.uuid == uuid).then_some(notification.value))
            })
            .take_until(closed_rx);

        Ok(frames.boxed())
    }

    async fn disconnect(&self, handle: &ConnectionHandle) {
        let released = self.links.lock().await.release(handle);

        let Some((mut link, still_used)) = released else {
            return;
        };

        if let Some(closed) = link.closed.take() {
            let _ = closed.send(());
        }
        if still_used {
            tracing::debug!(
                "Released {} on {}; peripheral still in use",
                handle.kind,
                handle.device_id
            );
            return;
        }

        tracing::info!("Disconnecting from sensor: {}", handle.device_id);
        if let Err(e) = link.peripheral.disconnect().await {
            tracing::warn!("Disconnect from {} failed: {}", handle.device_id, e);
        }
    }
}
