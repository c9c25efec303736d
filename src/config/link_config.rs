use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::bluetooth::{
    CONNECT_RETRY_DELAY_MS, DEFAULT_ATT_MTU, MAX_CONNECT_RETRIES, REPORT_QUEUE_CAPACITY,
    REQUESTED_MTU,
};

/// Connection and retry settings for one link session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Retries after the first failed connect attempt before giving up.
    pub max_retries: u32,
    /// Fixed delay before each retry, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Transfer unit requested right after the link comes up.
    pub requested_mtu: u16,
    /// Transfer unit assumed when negotiation fails.
    pub fallback_mtu: u16,
    /// Upper bound for a single connect attempt.
    pub connect_timeout_secs: u64,
    /// Upper bound for negotiation, discovery and subscription.
    pub operation_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            max_retries: MAX_CONNECT_RETRIES,
            retry_backoff_ms: CONNECT_RETRY_DELAY_MS,
            requested_mtu: REQUESTED_MTU,
            fallback_mtu: DEFAULT_ATT_MTU,
            connect_timeout_secs: 10,
            operation_timeout_secs: 10,
        }
    }
}

impl LinkConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

/// Settings for the report queue and its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reports buffered between the transport and the worker.
    pub queue_capacity: usize,
    /// How long `stop` waits for the worker before abandoning it.
    pub shutdown_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: REPORT_QUEUE_CAPACITY,
            shutdown_timeout_ms: 250,
        }
    }
}

impl PipelineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
