use serde::{Deserialize, Serialize};

/// Options for turning controller reports into gamepad state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Use the alternate face-button layout (A<->B, X<->Y).
    pub swap_face_buttons: bool,
    /// Stick components with a smaller magnitude are reported as centered. 0 disables it.
    pub stick_deadzone: u16,
}
