//! Constants used throughout the application
//! UUIDs of the controller's GATT endpoints and link-layer defaults.

use uuid::Uuid;

/// The Steam Controller input service
pub const UUID_CONTROLLER_SERVICE: Uuid = Uuid::from_u128(0x00010000_0001_1000_8000_00805f9b34fb);

/// The input report characteristic (notify)
pub const UUID_INPUT_CHAR: Uuid = Uuid::from_u128(0x00010001_0001_1000_8000_00805f9b34fb);

/// Maximum number of connection retries after the first attempt
pub const MAX_CONNECT_RETRIES: u32 = 3;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 500;

/// Transfer unit requested once connected
pub const REQUESTED_MTU: u16 = 512;

/// ATT default, used when negotiation fails
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Report queue capacity between the transport and the pipeline worker
pub const REPORT_QUEUE_CAPACITY: usize = 128;
