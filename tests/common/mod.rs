#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use steamlink_bridge_lib::core::bluetooth::{
    Connection, DeviceHandle, EndpointPresence, LinkEvent, ReportHandler, ScanFilter, Transport,
    TransportLink, UUID_INPUT_CHAR,
};
use steamlink_bridge_lib::error::{SinkError, TransportError};
use steamlink_bridge_lib::mapping::GamepadState;
use steamlink_bridge_lib::output::OutputSink;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// What the scripted link answers once connected.
#[derive(Clone)]
pub struct LinkScript {
    pub mtu: Result<u16, TransportError>,
    pub endpoints: EndpointPresence,
    pub subscribe: Result<(), TransportError>,
}

impl Default for LinkScript {
    fn default() -> Self {
        Self {
            mtu: Ok(185),
            endpoints: EndpointPresence {
                service: true,
                characteristic: true,
            },
            subscribe: Ok(()),
        }
    }
}

pub enum ConnectScript {
    /// Connect call itself fails
    Reject(TransportError),
    /// Connect call succeeds, the link then reports an error
    Fail(TransportError),
    Succeed(LinkScript),
    /// Never reports an outcome
    Hang,
}

pub struct MockLink {
    script: LinkScript,
    events: mpsc::Sender<LinkEvent>,
    handler: Mutex<Option<Arc<dyn ReportHandler>>>,
    closed: AtomicBool,
    pub subscribed: Mutex<Vec<Uuid>>,
}

impl MockLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Delivers a report as if it arrived on the input characteristic.
    pub fn deliver(&self, data: Vec<u8>) -> bool {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(handler) if !self.is_closed() => {
                handler.on_notification(UUID_INPUT_CHAR, data);
                true
            }
            _ => false,
        }
    }

    pub async fn drop_link(&self) {
        let _ = self.events.send(LinkEvent::Disconnected).await;
    }
}

#[async_trait::async_trait]
impl TransportLink for MockLink {
    async fn negotiate_transfer_unit(&self, _size: u16) -> Result<u16, TransportError> {
        self.script.mtu.clone()
    }

    async fn discover_endpoints(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<EndpointPresence, TransportError> {
        Ok(self.script.endpoints)
    }

    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: Arc<dyn ReportHandler>,
    ) -> Result<(), TransportError> {
        self.script.subscribe.clone()?;
        self.subscribed.lock().unwrap().push(characteristic);
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.handler.lock().unwrap().take();
    }
}

#[derive(Default)]
pub struct MockTransport {
    devices: Vec<DeviceHandle>,
    script: Mutex<VecDeque<ConnectScript>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    connect_calls: AtomicU32,
    /// Connect calls made while an earlier link was still open
    overlapping_connects: AtomicU32,
    scan_error: Mutex<Option<TransportError>>,
    pub scan_filters: Mutex<Vec<ScanFilter>>,
}

impl MockTransport {
    pub fn new(script: Vec<ConnectScript>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn with_devices(devices: Vec<DeviceHandle>, script: Vec<ConnectScript>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn fail_scans_with(&self, err: TransportError) {
        *self.scan_error.lock().unwrap() = Some(err);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn overlapping_connects(&self) -> u32 {
        self.overlapping_connects.load(Ordering::SeqCst)
    }

    pub fn links(&self) -> Vec<Arc<MockLink>> {
        self.links.lock().unwrap().clone()
    }

    pub fn link(&self, index: usize) -> Arc<MockLink> {
        self.links()[index].clone()
    }

    pub fn open_links(&self) -> usize {
        self.links().iter().filter(|l| !l.is_closed()).count()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn scan(
        &self,
        filter: &ScanFilter,
        _duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceHandle>, TransportError> {
        if let Some(err) = self.scan_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.scan_filters.lock().unwrap().push(filter.clone());

        let (tx, rx) = mpsc::channel(self.devices.len().max(1));
        for device in &self.devices {
            let _ = tx.try_send(device.clone());
        }
        Ok(rx)
    }

    async fn connect(&self, _device: &DeviceHandle) -> Result<Connection, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.open_links() > 0 {
            self.overlapping_connects.fetch_add(1, Ordering::SeqCst);
        }

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ConnectScript::Reject(TransportError::failed("no script left")));

        let (tx, rx) = mpsc::channel(8);
        let script = match next {
            ConnectScript::Reject(err) => return Err(err),
            ConnectScript::Fail(err) => {
                tx.try_send(LinkEvent::Error(err)).unwrap();
                LinkScript::default()
            }
            ConnectScript::Succeed(script) => {
                tx.try_send(LinkEvent::Connected).unwrap();
                script
            }
            ConnectScript::Hang => LinkScript::default(),
        };

        let link = Arc::new(MockLink {
            script,
            events: tx,
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
            subscribed: Mutex::new(Vec::new()),
        });
        self.links.lock().unwrap().push(link.clone());

        Ok(Connection { link, events: rx })
    }
}

/// Handler that ignores every report.
pub struct NullHandler;

impl ReportHandler for NullHandler {
    fn on_notification(&self, _characteristic: Uuid, _data: Vec<u8>) {}
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub connects: u32,
    pub disconnects: u32,
    pub frames: Vec<GamepadState>,
}

/// Output sink that records everything and forwards frames to a probe channel.
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    frames_tx: mpsc::UnboundedSender<GamepadState>,
    connected: bool,
    pub elevated: bool,
    pub fail_emits: bool,
}

pub struct SinkProbe {
    pub log: Arc<Mutex<SinkLog>>,
    pub frames: mpsc::UnboundedReceiver<GamepadState>,
}

impl SinkProbe {
    pub async fn next_frame(&mut self) -> GamepadState {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("sink dropped")
    }

    pub fn connects(&self) -> u32 {
        self.log.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> u32 {
        self.log.lock().unwrap().disconnects
    }
}

impl RecordingSink {
    pub fn new() -> (Self, SinkProbe) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let (frames_tx, frames) = mpsc::unbounded_channel();
        (
            Self {
                log: log.clone(),
                frames_tx,
                connected: false,
                elevated: true,
                fail_emits: false,
            },
            SinkProbe { log, frames },
        )
    }
}

impl OutputSink for RecordingSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        if !self.connected {
            self.connected = true;
            self.log.lock().unwrap().connects += 1;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.log.lock().unwrap().disconnects += 1;
        }
    }

    fn emit(&mut self, state: &GamepadState) -> Result<(), SinkError> {
        if self.fail_emits {
            return Err(SinkError::Io(std::io::Error::other("device gone")));
        }
        if !self.connected {
            return Err(SinkError::NotConnected);
        }
        self.log.lock().unwrap().frames.push(*state);
        let _ = self.frames_tx.send(*state);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn has_elevated_access(&self) -> bool {
        self.elevated
    }
}

/// A 20-byte update report with only `buttons` set.
pub fn update_report(buttons: u32) -> Vec<u8> {
    let mut report = vec![0u8; 20];
    report[0] = 0x01;
    report[4..7].copy_from_slice(&buttons.to_le_bytes()[..3]);
    report
}

pub fn connection_report(message: u8) -> Vec<u8> {
    let mut report = vec![0u8; 17];
    report[0] = 0x03;
    report[1] = message;
    report
}

pub fn battery_report(millivolts: u16) -> Vec<u8> {
    let mut report = vec![0u8; 17];
    report[0] = 0x04;
    report[1..3].copy_from_slice(&millivolts.to_le_bytes());
    report
}

/// Waits (bounded) until the watched value satisfies `predicate`.
pub async fn wait_until<T: Clone>(rx: &mut watch::Receiver<T>, predicate: impl FnMut(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for state")
        .expect("state publisher dropped")
        .clone()
}

pub fn controller(id: &str) -> DeviceHandle {
    DeviceHandle::new(id, "SteamController")
}
