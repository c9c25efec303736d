//! Steam Controller to Xbox-layout mapping
//! This module relabels controller buttons and normalizes axes into a [`GamepadState`].

use crate::config::mapping_config::MappingConfig;
use crate::core::controller::{UpdateEvent, buttons};
use crate::mapping::gamepad::{Axis, Button, GamepadState};

/// Physical button bit to logical button, default (positional) layout.
const BUTTON_TABLE: [(u32, Button); 15] = [
    (buttons::A, Button::A),
    (buttons::B, Button::B),
    (buttons::X, Button::X),
    (buttons::Y, Button::Y),
    (buttons::LS, Button::LeftBumper),
    (buttons::RS, Button::RightBumper),
    (buttons::PREV, Button::Back),
    (buttons::NEXT, Button::Start),
    (buttons::HOME, Button::Guide),
    (buttons::DPAD_UP, Button::DpadUp),
    (buttons::DPAD_DOWN, Button::DpadDown),
    (buttons::DPAD_LEFT, Button::DpadLeft),
    (buttons::DPAD_RIGHT, Button::DpadRight),
    (buttons::STICK, Button::LeftStick),
    (buttons::RPAD, Button::RightStick),
];

/// Maps decoded update events to gamepad state. Stateless apart from its config.
#[derive(Debug, Clone, Default)]
pub struct InputMapper {
    config: MappingConfig,
}

impl InputMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }

    pub fn map(&self, event: &UpdateEvent) -> GamepadState {
        let mut state = GamepadState::new();

        for (mask, button) in BUTTON_TABLE {
            state.set_button(self.relabel(button), event.is_pressed(mask));
        }

        let deadzone = self.config.stick_deadzone;
        state.set_axis(Axis::LeftX, apply_deadzone(event.left_axis.x, deadzone));
        state.set_axis(Axis::LeftY, apply_deadzone(invert_axis(event.left_axis.y), deadzone));
        state.set_axis(Axis::RightX, apply_deadzone(event.right_axis.x, deadzone));
        state.set_axis(Axis::RightY, apply_deadzone(invert_axis(event.right_axis.y), deadzone));

        state.set_axis(Axis::LeftTrigger, i16::from(event.left_trigger));
        state.set_axis(Axis::RightTrigger, i16::from(event.right_trigger));

        state
    }

    fn relabel(&self, button: Button) -> Button {
        if !self.config.swap_face_buttons {
            return button;
        }
        match button {
            Button::A => Button::B,
            Button::B => Button::A,
            Button::X => Button::Y,
            Button::Y => Button::X,
            other => other,
        }
    }
}

/// Flips a vertical axis. `i16::MIN` has no positive counterpart and clamps to `i16::MAX`.
pub fn invert_axis(value: i16) -> i16 {
    value.checked_neg().unwrap_or(i16::MAX)
}

fn apply_deadzone(value: i16, deadzone: u16) -> i16 {
    if value.unsigned_abs() < deadzone { 0 } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::controller::Vec2;

    fn map_update(event: &UpdateEvent) -> GamepadState {
        InputMapper::default().map(event)
    }

    fn event(buttons: u32) -> UpdateEvent {
        UpdateEvent {
            buttons,
            ..UpdateEvent::default()
        }
    }

    #[test]
    fn all_zero_event_maps_to_released_centered_state() {
        let state = map_update(&UpdateEvent::default());
        assert_eq!(state, GamepadState::new());
        assert_eq!(state.buttons().count(), Button::COUNT);
        assert_eq!(state.axes().count(), Axis::COUNT);
    }

    #[test]
    fn a_and_start_press_only_those_buttons() {
        let state = map_update(&event(buttons::A | buttons::NEXT));
        assert_eq!(state.pressed(), vec![Button::A, Button::Start]);
        assert!(state.axes().all(|(_, v)| v == 0));
    }

    #[test]
    fn every_table_entry_is_one_to_one() {
        for (mask, button) in BUTTON_TABLE {
            assert_eq!(map_update(&event(mask)).pressed(), vec![button]);
        }
    }

    #[test]
    fn unmapped_bits_press_nothing() {
        let unmapped = buttons::RT
            | buttons::LT
            | buttons::LGRIP
            | buttons::RGRIP
            | buttons::LFINGER
            | buttons::RFINGER
            | buttons::PAD_STICK_FLAG;
        assert!(map_update(&event(unmapped)).pressed().is_empty());
    }

    #[test]
    fn swapped_layout_exchanges_face_buttons() {
        let mapper = InputMapper::new(MappingConfig {
            swap_face_buttons: true,
            ..MappingConfig::default()
        });
        assert_eq!(mapper.map(&event(buttons::A)).pressed(), vec![Button::B]);
        assert_eq!(mapper.map(&event(buttons::Y)).pressed(), vec![Button::X]);
        assert_eq!(mapper.map(&event(buttons::HOME)).pressed(), vec![Button::Guide]);
    }

    #[test]
    fn vertical_axes_invert_without_overflow() {
        assert_eq!(invert_axis(i16::MIN), i16::MAX);
        assert_eq!(invert_axis(i16::MAX), -i16::MAX);
        assert_eq!(invert_axis(0), 0);

        let state = map_update(&UpdateEvent {
            left_axis: Vec2 { x: i16::MIN, y: i16::MIN },
            right_axis: Vec2 { x: 1000, y: 1000 },
            ..UpdateEvent::default()
        });
        assert_eq!(state.axis(Axis::LeftX), i16::MIN);
        assert_eq!(state.axis(Axis::LeftY), i16::MAX);
        assert_eq!(state.axis(Axis::RightX), 1000);
        assert_eq!(state.axis(Axis::RightY), -1000);
    }

    #[test]
    fn triggers_pass_through_unscaled() {
        let state = map_update(&UpdateEvent {
            left_trigger: 255,
            right_trigger: 7,
            ..UpdateEvent::default()
        });
        assert_eq!(state.axis(Axis::LeftTrigger), 255);
        assert_eq!(state.axis(Axis::RightTrigger), 7);
    }

    #[test]
    fn deadzone_centers_small_stick_values_only() {
        let mapper = InputMapper::new(MappingConfig {
            stick_deadzone: 500,
            ..MappingConfig::default()
        });
        let state = mapper.map(&UpdateEvent {
            left_trigger: 3,
            left_axis: Vec2 { x: 499, y: -600 },
            right_axis: Vec2 { x: -499, y: i16::MIN },
            ..UpdateEvent::default()
        });
        assert_eq!(state.axis(Axis::LeftX), 0);
        assert_eq!(state.axis(Axis::LeftY), 600);
        assert_eq!(state.axis(Axis::RightX), 0);
        assert_eq!(state.axis(Axis::RightY), i16::MAX);
        assert_eq!(state.axis(Axis::LeftTrigger), 3);
    }
}
