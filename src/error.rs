//! Error types shared across the bridge.

use serde::Serialize;
use uuid::Uuid;

/// A report that could not be turned into a complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("report too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("unknown event type 0x{0:02x}")]
    UnknownType(u8),
}

/// Failures reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(&'static str),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("transport failure (status {code:?}): {message}")]
    Failed { code: Option<i32>, message: String },
}

impl TransportError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_status(code: i32, message: impl Into<String>) -> Self {
        Self::Failed {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Permission problems are never worth retrying.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

impl From<bluest::Error> for TransportError {
    fn from(err: bluest::Error) -> Self {
        use bluest::error::ErrorKind;
        match err.kind() {
            ErrorKind::NotAuthorized => Self::PermissionDenied(err.to_string()),
            ErrorKind::AdapterUnavailable => Self::AdapterUnavailable,
            ErrorKind::NotFound => Self::DeviceNotFound(err.to_string()),
            ErrorKind::Timeout => Self::Timeout("bluetooth operation"),
            _ => Self::failed(err.to_string()),
        }
    }
}

/// Failures of the virtual output device.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("permission denied opening virtual device: {0}")]
    PermissionDenied(String),

    #[error("virtual device not connected")]
    NotConnected,

    #[error("virtual device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Classifies an I/O error from device creation.
    pub fn from_open(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied(err.to_string())
        } else {
            Self::Io(err)
        }
    }
}

/// Why a session ended in the `Failed` lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail")]
pub enum FailureReason {
    #[error("transport error (status {code:?}): {message}")]
    Transport { code: Option<i32>, message: String },

    #[error("endpoint not found: service {service} / characteristic {characteristic}")]
    EndpointNotFound { service: Uuid, characteristic: Uuid },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("virtual device unavailable: {0}")]
    OutputUnavailable(String),
}

impl FailureReason {
    /// Last status code, when the failure came from the transport with one.
    pub fn status_code(&self) -> Option<i32> {
        match self {
            Self::Transport { code, .. } => *code,
            _ => None,
        }
    }
}

impl From<TransportError> for FailureReason {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            TransportError::Failed { code, message } => Self::Transport { code, message },
            other => Self::Transport {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<SinkError> for FailureReason {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            other => Self::OutputUnavailable(other.to_string()),
        }
    }
}

/// Errors returned by the caller-facing supervisor handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("session supervisor has stopped")]
    Stopped,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("request rejected: {0}")]
    Rejected(FailureReason),
}
