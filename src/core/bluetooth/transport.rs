//! Transport abstraction
//! The link session and the scanner only talk to the radio through these traits, so the
//! state machine can be driven by the bluest backend or by a scripted transport in tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::{DeviceHandle, EndpointPresence, LinkEvent, ScanFilter};
use crate::error::TransportError;

/// Receives raw reports from the transport's delivery context.
///
/// Implementations must return quickly and must not block.
pub trait ReportHandler: Send + Sync {
    fn on_notification(&self, characteristic: Uuid, data: Vec<u8>);
}

/// One outstanding connect attempt: the link resource and its connection-state events.
pub struct Connection {
    pub link: Arc<dyn TransportLink>,
    pub events: mpsc::Receiver<LinkEvent>,
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Starts discovery. Devices arrive on the returned channel until `duration`
    /// elapses or the receiver is dropped.
    async fn scan(
        &self,
        filter: &ScanFilter,
        duration: Duration,
    ) -> Result<mpsc::Receiver<DeviceHandle>, TransportError>;

    /// Issues a single connect attempt, without any retry at this layer.
    ///
    /// The outcome is reported as the first [`LinkEvent`]; later events report
    /// loss of the connection.
    async fn connect(&self, device: &DeviceHandle) -> Result<Connection, TransportError>;
}

/// An open link to one device. Dropping it without `close` may leak the connection.
#[async_trait::async_trait]
pub trait TransportLink: Send + Sync {
    /// Requests a transfer unit, returning the one actually granted.
    async fn negotiate_transfer_unit(&self, size: u16) -> Result<u16, TransportError>;

    async fn discover_endpoints(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<EndpointPresence, TransportError>;

    /// Enables notifications on `characteristic`. Returns once the descriptor write is
    /// acknowledged; reports are then delivered to `handler`.
    async fn subscribe(
        &self,
        characteristic: Uuid,
        handler: Arc<dyn ReportHandler>,
    ) -> Result<(), TransportError>;

    /// Releases the link and stops notification delivery. Safe to call more than once.
    async fn close(&self);
}
