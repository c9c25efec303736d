//! Normalized Xbox-layout gamepad state handed to the output device.

use serde::{Deserialize, Serialize};

/// Logical output buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    X,
    Y,
    LeftBumper,
    RightBumper,
    Back,
    Start,
    Guide,
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    LeftStick,
    RightStick,
}

impl Button {
    pub const COUNT: usize = 15;

    pub const ALL: [Button; Self::COUNT] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::LeftBumper,
        Button::RightBumper,
        Button::Back,
        Button::Start,
        Button::Guide,
        Button::DpadUp,
        Button::DpadDown,
        Button::DpadLeft,
        Button::DpadRight,
        Button::LeftStick,
        Button::RightStick,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Logical output axes. Sticks use the full `i16` range, triggers `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    LeftTrigger,
    RightTrigger,
}

impl Axis {
    pub const COUNT: usize = 6;

    pub const ALL: [Axis; Self::COUNT] = [
        Axis::LeftX,
        Axis::LeftY,
        Axis::RightX,
        Axis::RightY,
        Axis::LeftTrigger,
        Axis::RightTrigger,
    ];

    pub fn is_trigger(self) -> bool {
        matches!(self, Axis::LeftTrigger | Axis::RightTrigger)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Complete gamepad snapshot.
///
/// Backed by fixed arrays indexed by the enums, so every button and every axis
/// always has a value. The default is all released and centered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamepadState {
    buttons: [bool; Button::COUNT],
    axes: [i16; Axis::COUNT],
}

impl GamepadState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn button(&self, button: Button) -> bool {
        self.buttons[button.index()]
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.buttons[button.index()] = pressed;
    }

    pub fn axis(&self, axis: Axis) -> i16 {
        self.axes[axis.index()]
    }

    pub fn set_axis(&mut self, axis: Axis, value: i16) {
        self.axes[axis.index()] = value;
    }

    pub fn buttons(&self) -> impl Iterator<Item = (Button, bool)> + '_ {
        Button::ALL.iter().map(|b| (*b, self.button(*b)))
    }

    pub fn axes(&self) -> impl Iterator<Item = (Axis, i16)> + '_ {
        Axis::ALL.iter().map(|a| (*a, self.axis(*a)))
    }

    pub fn pressed(&self) -> Vec<Button> {
        self.buttons()
            .filter_map(|(b, pressed)| pressed.then_some(b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_tables_match_discriminants() {
        for (i, b) in Button::ALL.iter().enumerate() {
            assert_eq!(b.index(), i);
        }
        for (i, a) in Axis::ALL.iter().enumerate() {
            assert_eq!(a.index(), i);
        }
    }

    #[test]
    fn default_is_released_and_centered() {
        let state = GamepadState::new();
        assert_eq!(state.buttons().count(), Button::COUNT);
        assert_eq!(state.axes().count(), Axis::COUNT);
        assert!(state.pressed().is_empty());
        assert!(state.axes().all(|(_, v)| v == 0));
    }
}
