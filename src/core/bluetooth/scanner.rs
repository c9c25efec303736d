use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::Transport;
use crate::core::bluetooth::types::{DeviceHandle, ScanFilter};
use crate::error::TransportError;

const SCAN_CHANNEL_CAPACITY: usize = 16;

/// Runs one discovery pass on behalf of the caller.
///
/// Results are de-duplicated by id and filtered by name before they reach the caller.
/// Starting a new scan stops the previous one.
pub struct Scanner {
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Starts a scan. Returns the device stream and a receiver that resolves with the number
    /// of devices reported once the scan has ended.
    pub async fn start_scan(
        &mut self,
        transport: &dyn Transport,
        filter: ScanFilter,
        duration: Duration,
    ) -> Result<(mpsc::Receiver<DeviceHandle>, oneshot::Receiver<usize>), TransportError> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }

        let source = transport.scan(&filter, duration).await?;

        self.cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        let handle = tokio::spawn(relay_discoveries(
            source,
            tx,
            filter,
            duration,
            self.cancel_token.clone(),
            done_tx,
        ));
        self.scan_task_handle = Some(handle);

        info!("Device scan task started ({:?}).", duration);
        Ok((rx, done_rx))
    }

    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            debug!("Waiting for scan task to finish...");
            match handle.await {
                Ok(()) => info!("Scan task finished."),
                Err(e) if e.is_cancelled() => info!("Scan task was cancelled."),
                Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
            }
        }
    }
}

async fn relay_discoveries(
    mut source: mpsc::Receiver<DeviceHandle>,
    out: mpsc::Sender<DeviceHandle>,
    filter: ScanFilter,
    duration: Duration,
    cancel_token: CancellationToken,
    done: oneshot::Sender<usize>,
) {
    let mut seen = HashSet::new();
    let deadline = sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = &mut deadline => break,
            _ = out.closed() => break,
            next = source.recv() => match next {
                Some(device) => {
                    if !filter.matches_name(&device.name) {
                        debug!("Ignoring device {} (name filter)", device);
                        continue;
                    }
                    if !seen.insert(device.id.clone()) {
                        continue;
                    }
                    info!("Found controller: {}", device);
                    if out.send(device).await.is_err() {
                        break;
                    }
                }
                None => {
                    info!("Bluetooth scan stream has ended.");
                    break;
                }
            }
        }
    }

    info!("Scan complete, {} device(s) reported.", seen.len());
    let _ = done.send(seen.len());
}

/// Starts a bluest scan task. Devices already connected to the system are reported first.
pub(crate) async fn spawn_bluest_scan(
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    filter: ScanFilter,
    duration: Duration,
) -> Result<mpsc::Receiver<DeviceHandle>, TransportError> {
    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
    let (started_tx, started_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(e) = bluest_scan_task(adapter, devices, filter, duration, tx, started_tx).await {
            error!("Bluetooth scan failed: {}", e);
        }
    });

    match started_rx.await {
        Ok(Ok(())) => Ok(rx),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::failed("scan task ended before starting")),
    }
}

async fn bluest_scan_task(
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    filter: ScanFilter,
    duration: Duration,
    tx: mpsc::Sender<DeviceHandle>,
    started: oneshot::Sender<Result<(), TransportError>>,
) -> Result<(), TransportError> {
    let scan_stream = match adapter.scan(&filter.services).await {
        Ok(stream) => {
            let _ = started.send(Ok(()));
            stream
        }
        Err(e) => {
            let err = TransportError::from(e);
            let _ = started.send(Err(err.clone()));
            return Err(err);
        }
    };
    tokio::pin!(scan_stream);

    // Devices that are already connected do not advertise.
    debug!("Checking for connected devices");
    for device in adapter.connected_devices_with_services(&filter.services).await? {
        let handle = register_device(&devices, device).await;
        if tx.send(handle).await.is_err() {
            return Ok(());
        }
    }

    info!("Starting bluetooth scan");
    let deadline = sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tx.closed() => break,
            result = scan_stream.next() => match result {
                Some(discovered) => {
                    debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                    let handle = register_device(&devices, discovered.device).await;
                    if tx.send(handle).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    Ok(())
}

async fn register_device(devices: &Mutex<HashMap<String, Device>>, device: Device) -> DeviceHandle {
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let id = device.id().to_string();
    devices.lock().await.insert(id.clone(), device);
    DeviceHandle::new(id, name)
}
