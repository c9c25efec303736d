//! Session supervisor
//! Owns at most one link session and one report pipeline. All requests are handed to a
//! single supervisor task through [`SupervisorHandle`], so lifecycle changes are serialized.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval};

use crate::config::AppConfig;
use crate::core::bluetooth::UUID_CONTROLLER_SERVICE;
use crate::core::bluetooth::scanner::Scanner;
use crate::core::bluetooth::transport::Transport;
use crate::core::bluetooth::types::{DeviceHandle, ScanFilter};
use crate::core::controller::ConnectionMessage;
use crate::core::pipeline::{PipelineSignal, PipelineStats, StreamPipeline};
use crate::core::session::{Endpoints, LinkSession, LinkSessionHandle, LinkSnapshot, LinkState};
use crate::error::{FailureReason, SupervisorError, TransportError};
use crate::mapping::mapper::InputMapper;
use crate::output::SharedSink;

const COMMAND_CAPACITY: usize = 32;
const STATS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    Idle,
    Scanning,
    Connecting,
    Streaming,
    Failed,
}

/// Everything an observer can learn about the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleSnapshot {
    pub lifecycle: Lifecycle,
    pub device: Option<DeviceHandle>,
    pub link: Option<LinkSnapshot>,
    /// Kept after returning to `Idle` until the next connect or disconnect
    pub last_error: Option<FailureReason>,
    pub battery_mv: Option<u16>,
    pub pipeline: PipelineStats,
}

impl Default for LifecycleSnapshot {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Idle,
            device: None,
            link: None,
            last_error: None,
            battery_mv: None,
            pipeline: PipelineStats::default(),
        }
    }
}

enum SupervisorCommand {
    Scan {
        duration: Duration,
        reply: oneshot::Sender<Result<mpsc::Receiver<DeviceHandle>, SupervisorError>>,
    },
    Connect {
        device: DeviceHandle,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A clonable handle that sends requests to the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
    state: watch::Receiver<LifecycleSnapshot>,
}

impl SupervisorHandle {
    /// Starts a scan and returns discovered controllers as they are found.
    pub async fn request_scan(
        &self,
        duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceHandle>, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Scan { duration, reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Starts a session for `device`. Returns once the session is under way; progress is
    /// published through [`subscribe`](Self::subscribe).
    pub async fn request_connect(&self, device: DeviceHandle) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Connect { device, reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)?
    }

    /// Tears down the current session. Returns after the link has been released.
    pub async fn request_disconnect(&self) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Disconnect { reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    pub fn current_state(&self) -> LifecycleSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.state.clone()
    }

    /// Disconnects and stops the supervisor task. Later requests fail with `Stopped`.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Shutdown { reply }).await?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    async fn send(&self, command: SupervisorCommand) -> Result<(), SupervisorError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SupervisorError::Stopped)
    }
}

struct ActiveSession {
    device: DeviceHandle,
    link: LinkSessionHandle,
    link_status: watch::Receiver<LinkSnapshot>,
    link_open: bool,
    pipeline: StreamPipeline,
    signals: mpsc::UnboundedReceiver<PipelineSignal>,
}

impl ActiveSession {
    /// Whether this session is still working on `device`. A link that already ended does not count.
    fn serves(&self, device: &DeviceHandle) -> bool {
        self.device == *device && !self.link.snapshot().state.is_terminal()
    }
}

enum SessionEvent {
    Link(LinkSnapshot),
    Signal(PipelineSignal),
}

pub struct SessionSupervisor {
    transport: Arc<dyn Transport>,
    sink: SharedSink,
    config: AppConfig,
    endpoints: Endpoints,
    scanner: Scanner,
    scan_done: Option<oneshot::Receiver<usize>>,
    active: Option<ActiveSession>,
    snapshot: LifecycleSnapshot,
    state_tx: watch::Sender<LifecycleSnapshot>,
}

impl SessionSupervisor {
    /// Starts the supervisor task and returns the handle callers use to reach it.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        sink: SharedSink,
        config: AppConfig,
    ) -> SupervisorHandle {
        Self::spawn_with_endpoints(transport, sink, config, Endpoints::default())
    }

    pub fn spawn_with_endpoints(
        transport: Arc<dyn Transport>,
        sink: SharedSink,
        config: AppConfig,
        endpoints: Endpoints,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state) = watch::channel(LifecycleSnapshot::default());

        let supervisor = Self {
            transport,
            sink,
            config,
            endpoints,
            scanner: Scanner::new(),
            scan_done: None,
            active: None,
            snapshot: LifecycleSnapshot::default(),
            state_tx,
        };
        tokio::spawn(supervisor.run(rx));

        SupervisorHandle { tx, state }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SupervisorCommand>) {
        info!("Session supervisor started.");
        let mut stats_tick = interval(STATS_INTERVAL);
        stats_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SupervisorCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = next_session_event(&mut self.active) => self.on_session_event(event).await,
                count = scan_finished(&mut self.scan_done) => self.on_scan_finished(count),
                _ = stats_tick.tick() => self.refresh_stats(),
            }
        }

        info!("Session supervisor stopped.");
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Scan { duration, reply } => {
                let result = self.start_scan(duration).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Connect { device, reply } => {
                let result = self.connect(device).await;
                let _ = reply.send(result);
            }
            SupervisorCommand::Disconnect { reply } => {
                self.stop_scan().await;
                self.teardown().await;
                self.snapshot.device = None;
                self.snapshot.last_error = None;
                self.publish(Lifecycle::Idle);
                let _ = reply.send(());
            }
            // Handled by the run loop.
            SupervisorCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn start_scan(
        &mut self,
        duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceHandle>, SupervisorError> {
        self.stop_scan().await;

        let filter = ScanFilter::for_service(UUID_CONTROLLER_SERVICE)
            .with_name(self.config.scan.name_filter.clone());
        match self
            .scanner
            .start_scan(self.transport.as_ref(), filter, duration)
            .await
        {
            Ok((devices, done)) => {
                self.scan_done = Some(done);
                if self.active.is_none() {
                    self.snapshot.last_error = None;
                    self.publish(Lifecycle::Scanning);
                }
                Ok(devices)
            }
            Err(e) => {
                error!("Failed to start scan: {}", e);
                if self.active.is_none() && e.is_permission() {
                    self.fail(FailureReason::from(e.clone()));
                }
                Err(SupervisorError::Transport(e))
            }
        }
    }

    async fn stop_scan(&mut self) {
        if self.scan_done.take().is_some() || self.scanner.is_scanning() {
            self.scanner.stop_scan().await;
        }
        if self.snapshot.lifecycle == Lifecycle::Scanning {
            self.publish(Lifecycle::Idle);
        }
    }

    fn on_scan_finished(&mut self, count: usize) {
        self.scan_done = None;
        debug!("Scan finished with {} device(s)", count);
        if self.snapshot.lifecycle == Lifecycle::Scanning {
            self.publish(Lifecycle::Idle);
        }
    }

    async fn connect(&mut self, device: DeviceHandle) -> Result<(), SupervisorError> {
        if let Some(active) = &self.active {
            if active.serves(&device) {
                info!("Already connected or connecting to {}", device);
                return Ok(());
            }
            info!("Replacing session for {} with {}", active.device, device);
        }

        self.stop_scan().await;
        self.teardown().await;
        self.snapshot.last_error = None;
        self.snapshot.battery_mv = None;

        if let Err(reason) = self.prepare_sink() {
            self.fail(reason.clone());
            return Err(SupervisorError::Rejected(reason));
        }

        let (signals_tx, signals) = mpsc::unbounded_channel();
        let pipeline = StreamPipeline::start(
            &self.config.pipeline,
            InputMapper::new(self.config.mapping.clone()),
            self.sink.clone(),
            signals_tx,
        );
        let session = LinkSession::new(device.clone(), self.config.link.clone(), self.endpoints);
        let link = session.spawn(self.transport.clone(), Arc::new(pipeline.submitter()));
        let link_status = link.status();

        self.active = Some(ActiveSession {
            device: device.clone(),
            link,
            link_status,
            link_open: true,
            pipeline,
            signals,
        });
        self.snapshot.device = Some(device);
        self.publish(Lifecycle::Connecting);
        Ok(())
    }

    fn prepare_sink(&self) -> Result<(), FailureReason> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if !sink.has_elevated_access() {
            return Err(FailureReason::PermissionDenied(
                "cannot create the virtual gamepad".to_string(),
            ));
        }
        sink.connect().map_err(FailureReason::from)
    }

    /// Stops the current session, if any. Returns after the link, the pipeline and
    /// the virtual device have all been released.
    async fn teardown(&mut self) -> Option<LinkSnapshot> {
        let active = self.active.take()?;
        info!("Tearing down session for {}", active.device);

        let final_link = active.link.disconnect().await;
        let stats = active.pipeline.stop().await;
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disconnect();

        self.snapshot.pipeline = stats;
        self.snapshot.link = Some(final_link.clone());
        Some(final_link)
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Link(link) => self.on_link_status(link).await,
            SessionEvent::Signal(signal) => self.on_pipeline_signal(signal).await,
        }
    }

    async fn on_link_status(&mut self, link: LinkSnapshot) {
        let state = link.state;
        self.snapshot.link = Some(link);

        match state {
            LinkState::Idle => {}
            LinkState::Connecting
            | LinkState::MtuNegotiating
            | LinkState::Discovering
            | LinkState::Subscribing => self.publish(Lifecycle::Connecting),
            LinkState::Streaming => self.publish(Lifecycle::Streaming),
            LinkState::Failed => {
                let final_link = self.teardown().await;
                let reason = final_link.and_then(|l| l.last_error).unwrap_or_else(|| {
                    FailureReason::from(TransportError::failed("link session failed"))
                });
                self.fail(reason);
            }
            LinkState::Disconnected => {
                info!("Session ended, link disconnected");
                self.teardown().await;
                self.snapshot.device = None;
                self.publish(Lifecycle::Idle);
            }
        }
    }

    async fn on_pipeline_signal(&mut self, signal: PipelineSignal) {
        match signal {
            PipelineSignal::Battery(battery) => {
                if self.snapshot.battery_mv != Some(battery.voltage) {
                    self.snapshot.battery_mv = Some(battery.voltage);
                    let lifecycle = self.snapshot.lifecycle;
                    self.publish(lifecycle);
                }
            }
            PipelineSignal::Connection(event) => match event.message {
                ConnectionMessage::Disconnected => {
                    info!("Controller reported disconnect");
                    self.teardown().await;
                    self.snapshot.device = None;
                    self.publish(Lifecycle::Idle);
                }
                other => info!("Controller connection message: {:?}", other),
            },
            PipelineSignal::EmitFailed { consecutive, error } => {
                let limit = self.config.supervisor.max_consecutive_emit_failures;
                if limit.is_some_and(|limit| consecutive >= limit) {
                    error!(
                        "Virtual gamepad failed {} times in a row, stopping session",
                        consecutive
                    );
                    self.teardown().await;
                    self.fail(FailureReason::OutputUnavailable(error));
                }
            }
            PipelineSignal::EmitRecovered => debug!("Virtual gamepad emits recovered"),
        }
    }

    /// Publishes `Failed` with its reason, then returns to `Idle` keeping the reason.
    fn fail(&mut self, reason: FailureReason) {
        warn!("Session failed: {}", reason);
        self.snapshot.last_error = Some(reason);
        self.publish(Lifecycle::Failed);
        self.snapshot.device = None;
        self.publish(Lifecycle::Idle);
    }

    fn refresh_stats(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let stats = active.pipeline.stats();
        if stats != self.snapshot.pipeline {
            self.snapshot.pipeline = stats;
            self.state_tx.send_replace(self.snapshot.clone());
        }
    }

    fn publish(&mut self, lifecycle: Lifecycle) {
        if self.snapshot.lifecycle != lifecycle {
            info!("Lifecycle: {:?} -> {:?}", self.snapshot.lifecycle, lifecycle);
        }
        self.snapshot.lifecycle = lifecycle;
        if let Some(active) = &self.active {
            self.snapshot.pipeline = active.pipeline.stats();
        }
        self.state_tx.send_replace(self.snapshot.clone());
    }

    async fn shutdown(&mut self) {
        info!("Shutting down session supervisor...");
        self.stop_scan().await;
        self.teardown().await;
        self.snapshot.device = None;
        self.publish(Lifecycle::Idle);
    }
}

async fn next_session_event(active: &mut Option<ActiveSession>) -> SessionEvent {
    let Some(session) = active.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        tokio::select! {
            changed = session.link_status.changed(), if session.link_open => match changed {
                Ok(()) => return SessionEvent::Link(session.link_status.borrow_and_update().clone()),
                Err(_) => session.link_open = false,
            },
            Some(signal) = session.signals.recv() => return SessionEvent::Signal(signal),
            else => return std::future::pending().await,
        }
    }
}

async fn scan_finished(done: &mut Option<oneshot::Receiver<usize>>) -> usize {
    match done.as_mut() {
        Some(rx) => rx.await.unwrap_or(0),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::link_config::{LinkConfig, PipelineConfig};
    use crate::core::bluetooth::transport::Connection;
    use crate::output::{LogSink, shared};

    /// Refuses every connect with a permission error, which ends the link at once.
    struct Refusing;

    /// Never finishes a connect attempt.
    struct Stalled;

    #[async_trait::async_trait]
    impl Transport for Refusing {
        async fn scan(
            &self,
            _filter: &ScanFilter,
            _duration: Duration,
        ) -> Result<mpsc::Receiver<DeviceHandle>, TransportError> {
            Err(TransportError::Unsupported("scan"))
        }

        async fn connect(&self, _device: &DeviceHandle) -> Result<Connection, TransportError> {
            Err(TransportError::PermissionDenied("bluetooth".into()))
        }
    }

    #[async_trait::async_trait]
    impl Transport for Stalled {
        async fn scan(
            &self,
            _filter: &ScanFilter,
            _duration: Duration,
        ) -> Result<mpsc::Receiver<DeviceHandle>, TransportError> {
            Err(TransportError::Unsupported("scan"))
        }

        async fn connect(&self, _device: &DeviceHandle) -> Result<Connection, TransportError> {
            std::future::pending().await
        }
    }

    fn controller(id: &str) -> DeviceHandle {
        DeviceHandle::new(id, "SteamController")
    }

    fn active_session(transport: Arc<dyn Transport>) -> ActiveSession {
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let pipeline = StreamPipeline::start(
            &PipelineConfig::default(),
            InputMapper::default(),
            shared(LogSink::new()),
            signals_tx,
        );
        let device = controller("dev-1");
        let link = LinkSession::new(device.clone(), LinkConfig::default(), Endpoints::default())
            .spawn(transport, Arc::new(pipeline.submitter()));
        ActiveSession {
            device,
            link_status: link.status(),
            link,
            link_open: true,
            pipeline,
            signals,
        }
    }

    #[tokio::test]
    async fn live_session_serves_only_its_device() {
        let active = active_session(Arc::new(Stalled));
        assert!(active.serves(&controller("dev-1")));
        assert!(!active.serves(&controller("dev-2")));
    }

    #[tokio::test]
    async fn ended_session_no_longer_serves_its_device() {
        let active = active_session(Arc::new(Refusing));
        let mut status = active.link.status();
        status.wait_for(|s| s.state.is_terminal()).await.unwrap();

        // The supervisor has not handled the failure yet, but a new request must still connect.
        assert!(!active.serves(&controller("dev-1")));
    }
}
