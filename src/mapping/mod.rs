pub mod gamepad;
pub mod mapper;

pub use gamepad::{Axis, Button, GamepadState};
pub use mapper::InputMapper;
