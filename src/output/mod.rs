//! Virtual gamepad output
//! The pipeline emits every mapped [`GamepadState`] to an [`OutputSink`].

#[cfg(target_os = "linux")]
pub mod uinput;

use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::error::SinkError;
use crate::mapping::gamepad::GamepadState;

/// A device that accepts gamepad frames.
///
/// `connect` and `disconnect` are idempotent: connecting twice keeps the first
/// device, disconnecting an unconnected sink does nothing.
pub trait OutputSink: Send {
    fn connect(&mut self) -> Result<(), SinkError>;

    fn disconnect(&mut self);

    fn emit(&mut self, state: &GamepadState) -> Result<(), SinkError>;

    fn is_connected(&self) -> bool;

    /// Whether the process may create the virtual device at all.
    fn has_elevated_access(&self) -> bool {
        true
    }
}

/// Shared handle used by both the supervisor (lifecycle) and the pipeline worker (emit).
pub type SharedSink = Arc<Mutex<dyn OutputSink>>;

pub fn shared<S: OutputSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Sink that only logs frames. Used for dry runs and on platforms without uinput.
#[derive(Debug, Default)]
pub struct LogSink {
    connected: bool,
    last: Option<GamepadState>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for LogSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        if !self.connected {
            info!("Log sink connected (no virtual device will be created).");
            self.connected = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            info!("Log sink disconnected.");
            self.connected = false;
        }
    }

    fn emit(&mut self, state: &GamepadState) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::NotConnected);
        }
        if self.last.as_ref() != Some(state) {
            debug!(
                "Gamepad frame: pressed={:?} axes={:?}",
                state.pressed(),
                state.axes().collect::<Vec<_>>()
            );
        }
        self.last = Some(*state);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sink_rejects_emit_until_connected() {
        let mut sink = LogSink::new();
        assert!(matches!(
            sink.emit(&GamepadState::new()),
            Err(SinkError::NotConnected)
        ));
        sink.connect().unwrap();
        sink.connect().unwrap();
        assert!(sink.emit(&GamepadState::new()).is_ok());
        sink.disconnect();
        sink.disconnect();
        assert!(!sink.is_connected());
    }
}
