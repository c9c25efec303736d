//! Linux uinput virtual gamepad
//! Creates an Xbox 360 style device through `/dev/uinput` and writes one synchronized
//! frame of key and absolute-axis events per emitted state.

use std::fs::OpenOptions;
use std::path::Path;

use evdev::uinput::VirtualDevice;
use evdev::{
    AbsInfo, AbsoluteAxisCode, AttributeSet, BusType, EventType, InputEvent, InputId, KeyCode,
    UinputAbsSetup,
};
use log::{info, warn};

use crate::config::device_config::VirtualDeviceConfig;
use crate::error::SinkError;
use crate::mapping::gamepad::{Axis, Button, GamepadState};
use crate::output::OutputSink;

const UINPUT_PATH: &str = "/dev/uinput";

const STICK_FUZZ: i32 = 16;
const STICK_FLAT: i32 = 128;

/// Key code for a button; the d-pad has none, it is reported on the hat axes.
fn key_code(button: Button) -> Option<KeyCode> {
    let code = match button {
        Button::A => KeyCode::BTN_SOUTH,
        Button::B => KeyCode::BTN_EAST,
        Button::X => KeyCode::BTN_NORTH,
        Button::Y => KeyCode::BTN_WEST,
        Button::LeftBumper => KeyCode::BTN_TL,
        Button::RightBumper => KeyCode::BTN_TR,
        Button::Back => KeyCode::BTN_SELECT,
        Button::Start => KeyCode::BTN_START,
        Button::Guide => KeyCode::BTN_MODE,
        Button::LeftStick => KeyCode::BTN_THUMBL,
        Button::RightStick => KeyCode::BTN_THUMBR,
        Button::DpadUp | Button::DpadDown | Button::DpadLeft | Button::DpadRight => return None,
    };
    Some(code)
}

/// -1, 0 or +1 along one hat axis. Both directions held cancel out.
fn hat_value(negative: bool, positive: bool) -> i32 {
    i32::from(positive) - i32::from(negative)
}

/// `(HAT0X, HAT0Y)` for the d-pad buttons of `state`. Up is negative Y.
fn dpad_hat(state: &GamepadState) -> (i32, i32) {
    (
        hat_value(state.button(Button::DpadLeft), state.button(Button::DpadRight)),
        hat_value(state.button(Button::DpadUp), state.button(Button::DpadDown)),
    )
}

fn axis_code(axis: Axis) -> AbsoluteAxisCode {
    match axis {
        Axis::LeftX => AbsoluteAxisCode::ABS_X,
        Axis::LeftY => AbsoluteAxisCode::ABS_Y,
        Axis::RightX => AbsoluteAxisCode::ABS_RX,
        Axis::RightY => AbsoluteAxisCode::ABS_RY,
        Axis::LeftTrigger => AbsoluteAxisCode::ABS_Z,
        Axis::RightTrigger => AbsoluteAxisCode::ABS_RZ,
    }
}

fn axis_info(axis: Axis) -> AbsInfo {
    if axis.is_trigger() {
        AbsInfo::new(0, 0, 255, 0, 0, 0)
    } else {
        AbsInfo::new(0, i16::MIN as i32, i16::MAX as i32, STICK_FUZZ, STICK_FLAT, 0)
    }
}

fn hat_info() -> AbsInfo {
    AbsInfo::new(0, -1, 1, 0, 0, 0)
}

/// Virtual gamepad backed by the kernel uinput driver.
pub struct UinputSink {
    config: VirtualDeviceConfig,
    device: Option<VirtualDevice>,
}

impl UinputSink {
    pub fn new(config: VirtualDeviceConfig) -> Self {
        Self {
            config,
            device: None,
        }
    }

    fn create_device(&self) -> std::io::Result<VirtualDevice> {
        let mut keys = AttributeSet::<KeyCode>::new();
        for code in Button::ALL.into_iter().filter_map(key_code) {
            keys.insert(code);
        }

        let mut builder = VirtualDevice::builder()?
            .name(&self.config.name)
            .input_id(InputId::new(
                BusType::BUS_VIRTUAL,
                self.config.vendor_id,
                self.config.product_id,
                self.config.version,
            ))
            .with_keys(&keys)?;

        for axis in Axis::ALL {
            builder = builder.with_absolute_axis(&UinputAbsSetup::new(axis_code(axis), axis_info(axis)))?;
        }
        for hat in [AbsoluteAxisCode::ABS_HAT0X, AbsoluteAxisCode::ABS_HAT0Y] {
            builder = builder.with_absolute_axis(&UinputAbsSetup::new(hat, hat_info()))?;
        }

        builder.build()
    }
}

impl OutputSink for UinputSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        if self.device.is_some() {
            warn!("Virtual gamepad already created");
            return Ok(());
        }
        let device = self.create_device().map_err(SinkError::from_open)?;
        info!("Virtual gamepad '{}' created", self.config.name);
        self.device = Some(device);
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the device closes the uinput fd, which removes it from the system.
        if self.device.take().is_some() {
            info!("Virtual gamepad '{}' removed", self.config.name);
        }
    }

    fn emit(&mut self, state: &GamepadState) -> Result<(), SinkError> {
        let device = self.device.as_mut().ok_or(SinkError::NotConnected)?;

        let mut events = Vec::with_capacity(Button::COUNT + Axis::COUNT + 2);
        for (button, pressed) in state.buttons() {
            if let Some(code) = key_code(button) {
                events.push(InputEvent::new(EventType::KEY.0, code.code(), i32::from(pressed)));
            }
        }
        for (axis, value) in state.axes() {
            events.push(InputEvent::new(
                EventType::ABSOLUTE.0,
                axis_code(axis).0,
                i32::from(value),
            ));
        }
        let (hat_x, hat_y) = dpad_hat(state);
        events.push(InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_HAT0X.0, hat_x));
        events.push(InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_HAT0Y.0, hat_y));

        // `emit` appends the SYN_REPORT that closes the frame.
        device.emit(&events)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    fn has_elevated_access(&self) -> bool {
        if self.device.is_some() {
            return true;
        }
        let path = Path::new(UINPUT_PATH);
        match OpenOptions::new().write(true).open(path) {
            Ok(_) => true,
            Err(e) => {
                warn!("Cannot open {} for writing: {}", UINPUT_PATH, e);
                false
            }
        }
    }
}

impl Drop for UinputSink {
    fn drop(&mut self) {
        self.disconnect();
    }
}
