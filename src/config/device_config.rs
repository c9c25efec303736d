use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity of the virtual gamepad presented to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualDeviceConfig {
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub version: u16,
}

impl Default for VirtualDeviceConfig {
    fn default() -> Self {
        VirtualDeviceConfig {
            name: "Steam Controller Bridge (Xbox 360 layout)".to_string(),
            // Microsoft X-Box 360 pad, so games pick the right default bindings.
            vendor_id: 0x045e,
            product_id: 0x028e,
            version: 0x0110,
        }
    }
}

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub duration_secs: u64,
    /// Only report devices whose name contains this text.
    pub name_filter: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            duration_secs: 10,
            name_filter: None,
        }
    }
}

impl ScanConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Session-level policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Tear the session down after this many emit failures in a row.
    pub max_consecutive_emit_failures: Option<u32>,
}
