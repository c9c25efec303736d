//! Steam Controller report decoding
//! This module turns raw notification payloads into typed controller events.
//! Decoding is a pure function of the input bytes.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Event tag carried in the first byte of every report.
pub const EVENT_TYPE_OFFSET: usize = 0;
pub const EVENT_UPDATE: u8 = 1;
pub const EVENT_CONNECTION: u8 = 3;
pub const EVENT_BATTERY: u8 = 4;

const TIMESTAMP_OFFSET: usize = 1;
const BUTTONS_OFFSET: usize = 4;
const LEFT_TRIGGER_OFFSET: usize = 7;
const RIGHT_TRIGGER_OFFSET: usize = 8;
const LEFT_AXIS_X_OFFSET: usize = 9;
const LEFT_AXIS_Y_OFFSET: usize = 11;
const RIGHT_AXIS_X_OFFSET: usize = 13;
const RIGHT_AXIS_Y_OFFSET: usize = 15;
const ACCEL_OFFSET: usize = 17;
const GYRO_OFFSET: usize = 23;
const ORIENTATION_OFFSET: usize = 29;

const CONNECTION_MSG_OFFSET: usize = 1;
const BATTERY_VOLTAGE_OFFSET: usize = 1;

/// Shortest frame the controller ever sends: everything up to the right stick Y axis.
pub const UPDATE_EVENT_MIN_LEN: usize = RIGHT_AXIS_Y_OFFSET + 2;

/// Frames with an unrecognised tag are only read as updates when they fill a whole BLE frame.
pub const UNTAGGED_UPDATE_MIN_LEN: usize = 20;

/// Length needed for the optional sensor block.
pub const SENSOR_EVENT_LEN: usize = ORIENTATION_OFFSET + 8;

/// Bit positions of the 24-bit button mask.
pub mod buttons {
    pub const RT: u32 = 1 << 0;
    pub const LT: u32 = 1 << 1;
    pub const RS: u32 = 1 << 2;
    pub const LS: u32 = 1 << 3;
    pub const Y: u32 = 1 << 4;
    pub const B: u32 = 1 << 5;
    pub const X: u32 = 1 << 6;
    pub const A: u32 = 1 << 7;
    pub const DPAD_UP: u32 = 0x01 << 8;
    pub const DPAD_RIGHT: u32 = 0x02 << 8;
    pub const DPAD_LEFT: u32 = 0x04 << 8;
    pub const DPAD_DOWN: u32 = 0x08 << 8;
    pub const PREV: u32 = 0x10 << 8;
    pub const HOME: u32 = 0x20 << 8;
    pub const NEXT: u32 = 0x40 << 8;
    pub const LGRIP: u32 = 0x80 << 8;
    pub const RGRIP: u32 = 0x01 << 16;
    pub const STICK: u32 = 0x02 << 16;
    pub const RPAD: u32 = 0x04 << 16;
    pub const LFINGER: u32 = 0x08 << 16;
    pub const RFINGER: u32 = 0x10 << 16;
    /// When set, LFINGER tells whether the left axis is the pad or the stick.
    pub const PAD_STICK_FLAG: u32 = 0x80 << 16;
}

/// A raw two-dimensional axis as reported by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: i16,
    pub y: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quat {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub w: i16,
}

/// Inertial data, only present in full-length frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorData {
    pub acceleration: Vec3,
    pub angular_velocity: Vec3,
    pub orientation: Quat,
}

/// The primary input report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Controller-side timestamp (24 bits)
    pub timestamp: u32,
    /// Raw button mask, see [`buttons`]
    pub buttons: u32,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_axis: Vec2,
    pub right_axis: Vec2,
    pub sensors: Option<SensorData>,
}

impl UpdateEvent {
    pub fn is_pressed(&self, mask: u32) -> bool {
        self.buttons & mask != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionMessage {
    Unknown,
    Disconnected,
    Connected,
    PairingRequested,
}

impl From<u8> for ConnectionMessage {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Disconnected,
            2 => Self::Connected,
            3 => Self::PairingRequested,
            _ => Self::Unknown,
        }
    }
}

/// Controller-side connection status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub message: ConnectionMessage,
}

/// Battery telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryEvent {
    /// Millivolts
    pub voltage: u16,
}

/// Any event the controller can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedEvent {
    Update(UpdateEvent),
    Connection(ConnectionEvent),
    Battery(BatteryEvent),
}

/// Decodes one raw report.
///
/// Every frame must be at least [`UPDATE_EVENT_MIN_LEN`] bytes long. The tag in
/// byte 0 selects the layout; an unknown tag is read as an update when the frame
/// is a full [`UNTAGGED_UPDATE_MIN_LEN`]-byte frame.
pub fn decode(data: &[u8]) -> Result<DecodedEvent, DecodeError> {
    if data.len() < UPDATE_EVENT_MIN_LEN {
        return Err(DecodeError::TooShort {
            len: data.len(),
            min: UPDATE_EVENT_MIN_LEN,
        });
    }

    match data[EVENT_TYPE_OFFSET] {
        EVENT_UPDATE => Ok(DecodedEvent::Update(parse_update(data))),
        EVENT_CONNECTION => Ok(DecodedEvent::Connection(ConnectionEvent {
            message: ConnectionMessage::from(data[CONNECTION_MSG_OFFSET]),
        })),
        EVENT_BATTERY => Ok(DecodedEvent::Battery(BatteryEvent {
            voltage: read_u16(data, BATTERY_VOLTAGE_OFFSET),
        })),
        _ if data.len() >= UNTAGGED_UPDATE_MIN_LEN => Ok(DecodedEvent::Update(parse_update(data))),
        tag => Err(DecodeError::UnknownType(tag)),
    }
}

// Callers guarantee `data.len() >= UPDATE_EVENT_MIN_LEN`.
fn parse_update(data: &[u8]) -> UpdateEvent {
    let sensors = (data.len() >= SENSOR_EVENT_LEN).then(|| SensorData {
        acceleration: read_vec3(data, ACCEL_OFFSET),
        angular_velocity: read_vec3(data, GYRO_OFFSET),
        orientation: Quat {
            x: read_i16(data, ORIENTATION_OFFSET),
            y: read_i16(data, ORIENTATION_OFFSET + 2),
            z: read_i16(data, ORIENTATION_OFFSET + 4),
            w: read_i16(data, ORIENTATION_OFFSET + 6),
        },
    });

    UpdateEvent {
        timestamp: read_u24(data, TIMESTAMP_OFFSET),
        buttons: read_u24(data, BUTTONS_OFFSET),
        left_trigger: data[LEFT_TRIGGER_OFFSET],
        right_trigger: data[RIGHT_TRIGGER_OFFSET],
        left_axis: Vec2 {
            x: read_i16(data, LEFT_AXIS_X_OFFSET),
            y: read_i16(data, LEFT_AXIS_Y_OFFSET),
        },
        right_axis: Vec2 {
            x: read_i16(data, RIGHT_AXIS_X_OFFSET),
            y: read_i16(data, RIGHT_AXIS_Y_OFFSET),
        },
        sensors,
    }
}

fn read_u24(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], 0])
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_vec3(data: &[u8], offset: usize) -> Vec3 {
    Vec3 {
        x: read_i16(data, offset),
        y: read_i16(data, offset + 2),
        z: read_i16(data, offset + 4),
    }
}
