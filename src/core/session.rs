//! Link session state machine
//! Drives one device from connect through service discovery to streaming, with bounded
//! retries, per-operation timeouts and cancellation at every await point.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::link_config::LinkConfig;
use crate::core::bluetooth::transport::{Connection, ReportHandler, Transport, TransportLink};
use crate::core::bluetooth::types::{DeviceHandle, LinkEvent};
use crate::core::bluetooth::{UUID_CONTROLLER_SERVICE, UUID_INPUT_CHAR};
use crate::error::{FailureReason, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Idle,
    Connecting,
    MtuNegotiating,
    Discovering,
    Subscribing,
    Streaming,
    Failed,
    Disconnected,
}

impl LinkState {
    /// `Failed` and `Disconnected` end the session; a new one is needed to reconnect.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }
}

/// The observable part of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub state: LinkState,
    /// Retries used since the last successful connect
    pub retry_count: u32,
    /// Connect attempts issued over the session's lifetime
    pub attempts: u32,
    pub negotiated_mtu: Option<u16>,
    pub last_error: Option<FailureReason>,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            state: LinkState::Idle,
            retry_count: 0,
            attempts: 0,
            negotiated_mtu: None,
            last_error: None,
        }
    }
}

/// Service and characteristic the session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            service: UUID_CONTROLLER_SERVICE,
            characteristic: UUID_INPUT_CHAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp(FailureReason),
}

/// How the driving loop ended.
enum Outcome {
    Cancelled,
    LinkLost,
    Failed(FailureReason),
}

enum StageError {
    Cancelled,
    LinkLost(Option<TransportError>),
    Transport(TransportError),
}

/// State and retry bookkeeping for one device. Consumed by [`LinkSession::spawn`].
pub struct LinkSession {
    device: DeviceHandle,
    config: LinkConfig,
    endpoints: Endpoints,
    state: LinkState,
    retry_count: u32,
    attempts: u32,
    negotiated_mtu: Option<u16>,
    subscribed: HashSet<Uuid>,
    last_error: Option<FailureReason>,
    link: Option<Arc<dyn TransportLink>>,
    status_tx: watch::Sender<LinkSnapshot>,
}

impl LinkSession {
    pub fn new(device: DeviceHandle, config: LinkConfig, endpoints: Endpoints) -> Self {
        let (status_tx, _) = watch::channel(LinkSnapshot::default());
        Self {
            device,
            config,
            endpoints,
            state: LinkState::Idle,
            retry_count: 0,
            attempts: 0,
            negotiated_mtu: None,
            subscribed: HashSet::new(),
            last_error: None,
            link: None,
            status_tx,
        }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            state: self.state,
            retry_count: self.retry_count,
            attempts: self.attempts,
            negotiated_mtu: self.negotiated_mtu,
            last_error: self.last_error.clone(),
        }
    }

    fn transition(&mut self, state: LinkState) {
        if self.state != state {
            debug!("Link {}: {:?} -> {:?}", self.device.id, self.state, state);
        }
        self.state = state;
        self.status_tx.send_replace(self.snapshot());
    }

    fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.transition(LinkState::Connecting);
    }

    /// Records a failed connect attempt and decides whether to try again.
    ///
    /// Permission failures are never retried. Otherwise up to `max_retries` further
    /// attempts are allowed, each after `retry_backoff`.
    pub fn record_connect_failure(&mut self, err: TransportError) -> RetryDecision {
        let reason = FailureReason::from(err.clone());
        self.last_error = Some(reason.clone());

        if err.is_permission() {
            error!("Connection to {} not permitted: {}", self.device.id, err);
            return RetryDecision::GiveUp(reason);
        }
        if self.retry_count >= self.config.max_retries {
            error!(
                "Failed to connect to {} after {} attempts: {}",
                self.device.id, self.attempts, err
            );
            return RetryDecision::GiveUp(reason);
        }

        self.retry_count += 1;
        self.status_tx.send_replace(self.snapshot());
        RetryDecision::Retry {
            attempt: self.retry_count,
            delay: self.config.retry_backoff(),
        }
    }

    /// Starts the session task. The returned handle is the only way to stop it.
    pub fn spawn(
        self,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn ReportHandler>,
    ) -> LinkSessionHandle {
        let device = self.device.clone();
        let status = self.status_tx.subscribe();
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(self.run(transport, handler, cancel_token.clone()));

        LinkSessionHandle {
            device,
            cancel_token,
            task: Some(task),
            status,
        }
    }

    async fn run(
        mut self,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn ReportHandler>,
        cancel_token: CancellationToken,
    ) -> LinkSnapshot {
        info!("Starting link session for {}", self.device);
        let outcome = self.drive(transport.as_ref(), handler, &cancel_token).await;

        self.release().await;
        match outcome {
            Outcome::Cancelled => {
                info!("Link session for {} cancelled", self.device.id);
                self.transition(LinkState::Disconnected);
            }
            Outcome::LinkLost => {
                warn!("Link to {} lost", self.device.id);
                self.transition(LinkState::Disconnected);
            }
            Outcome::Failed(reason) => {
                error!("Link session for {} failed: {}", self.device.id, reason);
                self.last_error = Some(reason);
                self.transition(LinkState::Failed);
            }
        }
        self.snapshot()
    }

    async fn release(&mut self) {
        self.subscribed.clear();
        if let Some(link) = self.link.take() {
            link.close().await;
        }
    }

    async fn drive(
        &mut self,
        transport: &dyn Transport,
        handler: Arc<dyn ReportHandler>,
        cancel_token: &CancellationToken,
    ) -> Outcome {
        let mut events = loop {
            self.begin_attempt();
            let limit = self.config.connect_timeout();
            let attempt = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Outcome::Cancelled,
                result = timeout(limit, self.attempt_connect(transport)) => result,
            };
            let err = match attempt {
                Ok(Ok(events)) => break events,
                Ok(Err(e)) => e,
                Err(_) => TransportError::Timeout("connect"),
            };

            warn!("Connection attempt {} failed: {}", self.attempts, err);
            self.release().await;
            match self.record_connect_failure(err) {
                RetryDecision::Retry { attempt, delay } => {
                    info!(
                        "Retrying connection in {:?} (retry {}/{})...",
                        delay, attempt, self.config.max_retries
                    );
                    tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => return Outcome::Cancelled,
                        _ = sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp(reason) => return Outcome::Failed(reason),
            }
        };

        let Some(link) = self.link.clone() else {
            return Outcome::Failed(FailureReason::from(TransportError::failed(
                "connected without a link",
            )));
        };
        self.retry_count = 0;
        info!("Connected to {}", self.device);

        self.transition(LinkState::MtuNegotiating);
        let requested = self.config.requested_mtu;
        let limit = self.config.operation_timeout();
        let mtu = match stage(
            cancel_token,
            &mut events,
            limit,
            "mtu",
            link.negotiate_transfer_unit(requested),
        )
        .await
        {
            Ok(granted) => {
                info!("Transfer unit negotiated: {}", granted);
                granted
            }
            Err(StageError::Transport(e)) => {
                warn!(
                    "Transfer unit negotiation failed ({}), using {}",
                    e, self.config.fallback_mtu
                );
                self.config.fallback_mtu
            }
            Err(e) => return self.stage_outcome(e),
        };
        self.negotiated_mtu = Some(mtu);

        self.transition(LinkState::Discovering);
        let Endpoints {
            service,
            characteristic,
        } = self.endpoints;
        let presence = match stage(
            cancel_token,
            &mut events,
            limit,
            "discovery",
            link.discover_endpoints(service, characteristic),
        )
        .await
        {
            Ok(presence) => presence,
            Err(e) => return self.stage_outcome(e),
        };
        if !presence.complete() {
            warn!(
                "Endpoints missing (service found: {}, characteristic found: {})",
                presence.service, presence.characteristic
            );
            return Outcome::Failed(FailureReason::EndpointNotFound {
                service,
                characteristic,
            });
        }

        self.transition(LinkState::Subscribing);
        if let Err(e) = stage(
            cancel_token,
            &mut events,
            limit,
            "subscribe",
            link.subscribe(characteristic, handler),
        )
        .await
        {
            return self.stage_outcome(e);
        }
        self.subscribed.insert(characteristic);

        self.transition(LinkState::Streaming);
        info!("Streaming reports from {}", self.device);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Outcome::Cancelled,
                event = events.recv() => match event {
                    Some(LinkEvent::Connected) => continue,
                    Some(LinkEvent::Error(e)) => {
                        warn!("Link error while streaming: {}", e);
                        self.last_error = Some(e.into());
                        return Outcome::LinkLost;
                    }
                    Some(LinkEvent::Disconnected) | None => return Outcome::LinkLost,
                }
            }
        }
    }

    /// One connect attempt. The link is held by the session as soon as it exists, so a
    /// cancelled attempt is still released.
    async fn attempt_connect(
        &mut self,
        transport: &dyn Transport,
    ) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        info!("Initiating connection to {}...", self.device);
        let Connection { link, mut events } = transport.connect(&self.device).await?;
        self.link = Some(link);

        match events.recv().await {
            Some(LinkEvent::Connected) => Ok(events),
            Some(LinkEvent::Error(e)) => Err(e),
            Some(LinkEvent::Disconnected) | None => {
                Err(TransportError::failed("link dropped while connecting"))
            }
        }
    }

    fn stage_outcome(&self, err: StageError) -> Outcome {
        match err {
            StageError::Cancelled => Outcome::Cancelled,
            StageError::LinkLost(cause) => Outcome::Failed(
                cause
                    .unwrap_or_else(|| TransportError::failed("link lost during setup"))
                    .into(),
            ),
            StageError::Transport(e) => Outcome::Failed(e.into()),
        }
    }
}

/// Runs one setup operation, racing it against cancellation, link loss and its timeout.
async fn stage<T, F>(
    cancel_token: &CancellationToken,
    events: &mut mpsc::Receiver<LinkEvent>,
    limit: Duration,
    what: &'static str,
    operation: F,
) -> Result<T, StageError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    let operation = timeout(limit, operation);
    tokio::pin!(operation);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(StageError::Cancelled),
            event = events.recv() => match event {
                Some(LinkEvent::Connected) => continue,
                Some(LinkEvent::Error(e)) => return Err(StageError::LinkLost(Some(e))),
                Some(LinkEvent::Disconnected) | None => return Err(StageError::LinkLost(None)),
            },
            result = &mut operation => {
                return match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(StageError::Transport(e)),
                    Err(_) => Err(StageError::Transport(TransportError::Timeout(what))),
                };
            }
        }
    }
}

/// Owner's handle to a running session.
pub struct LinkSessionHandle {
    device: DeviceHandle,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<LinkSnapshot>>,
    status: watch::Receiver<LinkSnapshot>,
}

impl LinkSessionHandle {
    pub fn snapshot(&self) -> LinkSnapshot {
        self.status.borrow().clone()
    }

    /// A receiver that observes every published state change.
    pub fn status(&self) -> watch::Receiver<LinkSnapshot> {
        self.status.clone()
    }

    /// Cancels the session and waits until its link has been released.
    ///
    /// No connect attempt starts after this is called. Returns the final snapshot.
    pub async fn disconnect(mut self) -> LinkSnapshot {
        self.cancel_token.cancel();
        let Some(task) = self.task.take() else {
            return self.snapshot();
        };
        match task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Link session task for {} ended abnormally: {:?}", self.device.id, e);
                let mut snapshot = self.status.borrow().clone();
                snapshot.state = LinkState::Disconnected;
                snapshot
            }
        }
    }
}

impl Drop for LinkSessionHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
