//! Defines shared data structures for the Bluetooth module.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::TransportError;

/// A discovered controller. Produced by a scan, consumed by connect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceHandle {
    /// Platform-specific identifier used to reach the device again
    pub id: String,
    /// The advertised name, or "Unknown"
    pub name: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The MAC address embedded in the id, when the platform exposes one.
    pub fn mac_address(&self) -> Option<String> {
        static MAC_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = MAC_RE
            .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok())
            .as_ref()?;
        re.find_iter(&self.id)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// What a scan should report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Advertised services to match; empty matches everything.
    pub services: Vec<Uuid>,
    /// Name substring to match.
    pub name_contains: Option<String>,
}

impl ScanFilter {
    pub fn for_service(service: Uuid) -> Self {
        Self {
            services: vec![service],
            name_contains: None,
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name_contains = name;
        self
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name_contains
            .as_deref()
            .map(|wanted| name.contains(wanted))
            .unwrap_or(true)
    }
}

/// Connection-state changes reported by the transport for one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// The attempt failed; `TransportError::Failed` carries the status code when there is one.
    Error(TransportError),
}

/// Result of endpoint discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointPresence {
    pub service: bool,
    pub characteristic: bool,
}

impl EndpointPresence {
    pub fn complete(&self) -> bool {
        self.service && self.characteristic
    }
}
