//! Bluetooth functionality for the Steam Controller bridge
//! This module covers scanning, connecting and receiving input reports, behind the
//! transport traits the link session is written against.

pub mod connection;
mod constants;
mod notification;
pub mod scanner;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use connection::BluestTransport;
pub use constants::*; // Re-export all constants
pub use scanner::Scanner;
pub use transport::{Connection, ReportHandler, Transport, TransportLink};
pub use types::{DeviceHandle, EndpointPresence, LinkEvent, ScanFilter};
