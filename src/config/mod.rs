pub mod layout;
pub mod path;

use std::{io, path::Path};

use glob_match::glob_match;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    drivers::trackpad::{decoder::TargetSpace, ProfilePreference},
    input::Side,
};

/// Represents all possible errors loading a configuration document
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not read: {0}")]
    IoError(#[from] io::Error),
    #[error("Unable to deserialize: {0}")]
    DeserializeError(#[from] serde_yaml::Error),
    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Invalid configuration. This is the only error that prevents the engine
/// from being constructed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Duplicate key '{id}' on the {side} side")]
    DuplicateKey { side: Side, id: String },
    #[error("Invalid key '{id}': {reason}")]
    InvalidKey { id: String, reason: String },
    #[error("Keymap references layer {layer} but only {count} exist")]
    UnknownLayer { layer: usize, count: usize },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Mouse buttons that can be bound to actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Something a key or gesture does when triggered
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Consume the input without emitting anything
    #[default]
    None,
    Key {
        key: String,
    },
    Chord {
        modifiers: Vec<String>,
        key: String,
    },
    MouseButton {
        button: MouseButton,
    },
    /// Toggle the chordal shift modifier
    ChordalShift,
    ToggleTyping,
    ToggleKeyboardMode,
    /// Switch the active keymap layer. Toggling the active layer returns to
    /// the base layer.
    LayerToggle {
        layer: usize,
    },
    /// Activate a keymap layer only while the key is held
    MomentaryLayer {
        layer: usize,
    },
}

impl Action {
    pub fn key(key: &str) -> Self {
        Action::Key {
            key: key.to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Action::None)
    }

    /// Returns the keymap layer this action refers to, if any
    pub fn layer(&self) -> Option<usize> {
        match self {
            Action::LayerToggle { layer } | Action::MomentaryLayer { layer } => Some(*layer),
            _ => None,
        }
    }
}

/// Bindings for every gesture the engine can recognize
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct GestureBindings {
    pub two_finger_tap: Action,
    pub three_finger_tap: Action,
    pub four_finger_hold: Action,
    pub five_finger_swipe_left: Action,
    pub five_finger_swipe_right: Action,
    pub five_finger_swipe_up: Action,
    pub five_finger_swipe_down: Action,
    pub corner_top_left: Action,
    pub corner_top_right: Action,
    pub corner_bottom_left: Action,
    pub corner_bottom_right: Action,
}

impl Default for GestureBindings {
    fn default() -> Self {
        Self {
            two_finger_tap: Action::MouseButton {
                button: MouseButton::Left,
            },
            three_finger_tap: Action::MouseButton {
                button: MouseButton::Right,
            },
            four_finger_hold: Action::ChordalShift,
            five_finger_swipe_left: Action::ToggleTyping,
            five_finger_swipe_right: Action::ToggleTyping,
            five_finger_swipe_up: Action::ToggleKeyboardMode,
            five_finger_swipe_down: Action::ToggleKeyboardMode,
            corner_top_left: Action::None,
            corner_top_right: Action::None,
            corner_bottom_left: Action::None,
            corner_bottom_right: Action::None,
        }
    }
}

impl GestureBindings {
    fn actions(&self) -> [&Action; 11] {
        [
            &self.two_finger_tap,
            &self.three_finger_tap,
            &self.four_finger_hold,
            &self.five_finger_swipe_left,
            &self.five_finger_swipe_right,
            &self.five_finger_swipe_up,
            &self.five_finger_swipe_down,
            &self.corner_top_left,
            &self.corner_top_right,
            &self.corner_bottom_left,
            &self.corner_bottom_right,
        ]
    }
}

/// Physical size of one trackpad surface
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct SurfaceConfig {
    pub width_mm: f64,
    pub height_mm: f64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width_mm: 160.0,
            height_mm: 114.9,
        }
    }
}

/// Per-device decoder overrides. The path is a glob matched against the
/// device path (e.g. "/dev/hidraw*").
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct DeviceConfig {
    pub path: String,
    pub profile: Option<ProfilePreference>,
    pub side: Option<Side>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct DecoderConfig {
    pub target_max_x: u16,
    pub target_max_y: u16,
    pub default_profile: ProfilePreference,
    pub devices: Vec<DeviceConfig>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let target = TargetSpace::default();
        Self {
            target_max_x: target.max_x,
            target_max_y: target.max_y,
            default_profile: ProfilePreference::Auto,
            devices: Vec::new(),
        }
    }
}

impl DecoderConfig {
    pub fn target(&self) -> TargetSpace {
        TargetSpace {
            max_x: self.target_max_x,
            max_y: self.target_max_y,
        }
    }

    /// Returns the first device override whose glob matches the given path
    pub fn device_for(&self, path: &str) -> Option<&DeviceConfig> {
        self.devices
            .iter()
            .find(|device| glob_match(device.path.as_str(), path))
    }

    /// Returns the decoder preference for the given device path
    pub fn profile_for(&self, path: &str) -> ProfilePreference {
        self.device_for(path)
            .and_then(|device| device.profile)
            .unwrap_or(self.default_profile)
    }

    /// Returns the configured side for the given device path
    pub fn side_for(&self, path: &str) -> Option<Side> {
        self.device_for(path).and_then(|device| device.side)
    }
}

/// Capacities of the bounded queues between pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct QueueConfig {
    pub frame_capacity: usize,
    pub dispatch_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            frame_capacity: 256,
            dispatch_capacity: 128,
        }
    }
}

/// Tuning and bindings for the intent and gesture engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    pub surface: SurfaceConfig,
    /// How long a contact must stay down to count as a hold
    pub hold_duration_ms: u64,
    /// Travel after which a typing contact is abandoned
    pub drag_cancel_mm: f64,
    /// How long typing stays committed after the last contact lifts
    pub typing_grace_ms: u64,
    pub intent_move_mm: f64,
    pub intent_velocity_mm_s: f64,
    /// Snap radius as a percentage of a key's shorter dimension
    pub snap_radius_percent: f64,
    /// Snaps are refused when best / second best distance reaches this ratio
    pub snap_ambiguity_ratio: f64,
    pub tap_stagger_tolerance_ms: u64,
    pub tap_cadence_ms: u64,
    pub tap_move_mm: f64,
    pub force_min: u8,
    /// Upper bound of the accepted force band. Zero disables key dispatch.
    pub force_max: u8,
    pub swipe_distance_mm: f64,
    /// Contacts missing from frames for longer than this are released
    pub contact_liveness_ms: u64,
    pub corner_zone_mm: f64,
    pub gestures: GestureBindings,
    /// Ignore contacts that start off-key instead of treating them as pointer
    pub keyboard_mode: bool,
    /// Allow the four finger hold to act as a shift modifier
    pub chordal_shift: bool,
    pub typing_enabled: bool,
    pub decoder: DecoderConfig,
    pub queues: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceConfig::default(),
            hold_duration_ms: 220,
            drag_cancel_mm: 6.0,
            typing_grace_ms: 300,
            intent_move_mm: 3.0,
            intent_velocity_mm_s: 60.0,
            snap_radius_percent: 35.0,
            snap_ambiguity_ratio: 0.85,
            tap_stagger_tolerance_ms: 50,
            tap_cadence_ms: 200,
            tap_move_mm: 2.0,
            force_min: 0,
            force_max: 255,
            swipe_distance_mm: 18.0,
            contact_liveness_ms: 12,
            corner_zone_mm: 12.0,
            gestures: GestureBindings::default(),
            keyboard_mode: false,
            chordal_shift: true,
            typing_enabled: true,
            decoder: DecoderConfig::default(),
            queues: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load an [EngineConfig] from the given YAML string
    pub fn from_yaml(content: String) -> Result<EngineConfig, LoadError> {
        let config: EngineConfig = serde_yaml::from_str(content.as_str())?;
        Ok(config)
    }

    /// Load an [EngineConfig] from the given YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<EngineConfig, LoadError> {
        let file = std::fs::File::open(path)?;
        let config: EngineConfig = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// Check every value the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("surface.width_mm", self.surface.width_mm),
            ("surface.height_mm", self.surface.height_mm),
            ("swipe_distance_mm", self.swipe_distance_mm),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, format!("{value} must be greater than zero")));
            }
        }

        let non_negative = [
            ("drag_cancel_mm", self.drag_cancel_mm),
            ("intent_move_mm", self.intent_move_mm),
            ("intent_velocity_mm_s", self.intent_velocity_mm_s),
            ("snap_radius_percent", self.snap_radius_percent),
            ("tap_move_mm", self.tap_move_mm),
            ("corner_zone_mm", self.corner_zone_mm),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, format!("{value} must not be negative")));
            }
        }

        if !(self.snap_ambiguity_ratio > 0.0 && self.snap_ambiguity_ratio <= 1.0) {
            return Err(invalid(
                "snap_ambiguity_ratio",
                format!("{} must be in (0, 1]", self.snap_ambiguity_ratio),
            ));
        }
        if self.force_max != 0 && self.force_min > self.force_max {
            return Err(invalid(
                "force_min",
                format!(
                    "{} is above force_max {}",
                    self.force_min, self.force_max
                ),
            ));
        }
        if self.contact_liveness_ms == 0 {
            return Err(invalid("contact_liveness_ms", "must be greater than zero"));
        }
        if self.decoder.target_max_x == 0 || self.decoder.target_max_y == 0 {
            return Err(invalid("decoder", "target space must not be empty"));
        }
        if self.queues.frame_capacity == 0 || self.queues.dispatch_capacity == 0 {
            return Err(invalid("queues", "capacities must be greater than zero"));
        }

        Ok(())
    }

    /// Layers referenced by gesture bindings, used to validate them against
    /// the keymap
    pub fn referenced_layers(&self) -> impl Iterator<Item = usize> + '_ {
        self.gestures.actions().into_iter().filter_map(Action::layer)
    }

    /// Millimetres per target unit along each axis
    pub fn mm_per_unit(&self) -> (f64, f64) {
        let target = self.decoder.target();
        (
            self.surface.width_mm / target.max_x as f64,
            self.surface.height_mm / target.max_y as f64,
        )
    }
}
