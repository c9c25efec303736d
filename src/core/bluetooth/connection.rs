//! Bluetooth connection handling backed by bluest
//! Implements [`Transport`] and [`TransportLink`] for a real adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bluest::{Adapter, ConnectionEvent, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::notification::forward_notifications;
use crate::core::bluetooth::scanner::spawn_bluest_scan;
use crate::core::bluetooth::transport::{Connection, ReportHandler, Transport, TransportLink};
use crate::core::bluetooth::types::{DeviceHandle, EndpointPresence, LinkEvent, ScanFilter};
use crate::error::TransportError;

const LINK_EVENT_CAPACITY: usize = 8;
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Bluetooth transport for the system's default adapter.
#[derive(Clone)]
pub struct BluestTransport {
    adapter: Adapter,
    /// Devices seen by the last scans, keyed by id
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let adapter = Adapter::default()
            .await
            .ok_or(TransportError::AdapterUnavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait::async_trait]
impl Transport for BluestTransport {
    async fn scan(
        &self,
        filter: &ScanFilter,
        duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceHandle>, TransportError> {
        spawn_bluest_scan(
            self.adapter.clone(),
            self.devices.clone(),
            filter.clone(),
            duration,
        )
        .await
    }

    async fn connect(&self, handle: &DeviceHandle) -> Result<Connection, TransportError> {
        let device = self
            .devices
            .lock()
            .await
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| TransportError::DeviceNotFound(handle.id.clone()))?;

        info!("Device details - ID: {}, Name: {}", handle.id, handle.name);

        let (tx, rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let cancel_token = CancellationToken::new();
        tokio::spawn(watch_connection(
            self.adapter.clone(),
            device.clone(),
            tx,
            cancel_token.clone(),
        ));

        let link = BluestLink {
            adapter: self.adapter.clone(),
            device,
            characteristics: Mutex::new(HashMap::new()),
            cancel_token,
            closed: AtomicBool::new(false),
        };
        Ok(Connection {
            link: Arc::new(link),
            events: rx,
        })
    }
}

/// Connects, reports the outcome, then reports connection loss until cancelled.
async fn watch_connection(
    adapter: Adapter,
    device: Device,
    events: mpsc::Sender<LinkEvent>,
    cancel_token: CancellationToken,
) {
    let id = device.id().to_string();

    if !device.is_connected().await {
        info!("Initiating connection to {}...", id);
        let result = tokio::select! {
            _ = cancel_token.cancelled() => return,
            result = adapter.connect_device(&device) => result,
        };
        if let Err(e) = result {
            warn!("Connection to {} failed: {}", id, e);
            let _ = events.send(LinkEvent::Error(e.into())).await;
            return;
        }
    }

    if events.send(LinkEvent::Connected).await.is_err() {
        return;
    }
    info!("Connected to {}", id);

    match adapter.device_connection_events(&device).await {
        Ok(stream) => {
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => return,
                    event = stream.next() => match event {
                        Some(ConnectionEvent::Connected) => debug!("{} reported connected", id),
                        Some(ConnectionEvent::Disconnected) | None => break,
                    }
                }
            }
        }
        Err(e) => {
            // Some backends do not report connection events; poll instead.
            debug!("Connection events unavailable ({}), polling instead", e);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => return,
                    _ = sleep(CONNECTION_POLL_INTERVAL) => {
                        if !device.is_connected().await {
                            break;
                        }
                    }
                }
            }
        }
    }

    info!("Device {} disconnected", id);
    let _ = events.send(LinkEvent::Disconnected).await;
}

/// An open bluest link. Notification tasks are children of the link's cancel token.
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
    cancel_token: CancellationToken,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl TransportLink for BluestLink {
    async fn negotiate_transfer_unit(&self, _size: u16) -> Result<u16, TransportError> {
        // bluest leaves the exchange to the OS stack.
        Err(TransportError::Unsupported("explicit MTU exchange"))
    }

    async fn discover_endpoints(
        &self,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<EndpointPresence, TransportError> {
        info!("Discovering services...");
        let services = self.device.services().await?;
        let Some(service) = services.iter().find(|s| s.uuid() == service_uuid) else {
            for service in &services {
                info!("Available service: {}", service.uuid());
            }
            return Ok(EndpointPresence::default());
        };
        info!("Found controller service: {}", service.uuid());

        let found = service
            .characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == characteristic_uuid);

        let presence = EndpointPresence {
            service: true,
            characteristic: found.is_some(),
        };
        if let Some(characteristic) = found {
            info!("Found input characteristic: {}", characteristic_uuid);
            self.characteristics
                .lock()
                .await
                .insert(characteristic_uuid, characteristic);
        }
        Ok(presence)
    }

    async fn subscribe(
        &self,
        characteristic_uuid: Uuid,
        handler: Arc<dyn ReportHandler>,
    ) -> Result<(), TransportError> {
        let characteristic = self
            .characteristics
            .lock()
            .await
            .get(&characteristic_uuid)
            .cloned()
            .ok_or_else(|| TransportError::failed("characteristic was not discovered"))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::spawn(forward_notifications(
            characteristic,
            handler,
            ack_tx,
            self.cancel_token.child_token(),
        ));

        ack_rx
            .await
            .map_err(|_| TransportError::failed("notification task ended before subscribing"))?
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel_token.cancel();

        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            match self.adapter.disconnect_device(&self.device).await {
                Ok(()) => info!("Successfully disconnected"),
                Err(e) => error!("Failed to disconnect from {}: {}", self.device.id(), e),
            }
        } else {
            debug!("Device {} not connected", self.device.id());
        }
    }
}

