//! Steam Controller bridge library
//! Decodes Steam Controller BLE input reports and replays them on a virtual gamepad.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod output;
pub mod state;
pub mod utils;

pub use error::{DecodeError, FailureReason, SinkError, SupervisorError, TransportError};
