//! Notification handling for the controller input characteristic
//! Forwards every notification value to a [`ReportHandler`] until cancelled.

use std::sync::Arc;

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{error, info, trace};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::ReportHandler;
use crate::error::TransportError;

/// Subscribes to `characteristic` and forwards notifications.
///
/// `ack` resolves once notifications are enabled (or failed to be).
pub(crate) async fn forward_notifications(
    characteristic: Characteristic,
    handler: Arc<dyn ReportHandler>,
    ack: oneshot::Sender<Result<(), TransportError>>,
    cancel_token: CancellationToken,
) {
    let uuid = characteristic.uuid();
    info!("Subscribing to notifications on {}...", uuid);

    let notification_stream = match characteristic.notify().await {
        Ok(stream) => {
            let _ = ack.send(Ok(()));
            stream
        }
        Err(e) => {
            error!("Failed to subscribe to notifications: {}", e);
            let _ = ack.send(Err(e.into()));
            return;
        }
    };
    tokio::pin!(notification_stream);

    info!("Listening for controller notifications...");
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            item = notification_stream.next() => match item {
                Some(Ok(value)) => {
                    trace!("Received controller data: {:?}", value);
                    handler.on_notification(uuid, value);
                }
                Some(Err(e)) => {
                    error!("Error in notification stream: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    info!("Notification stream ended");
}
