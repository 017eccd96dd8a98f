use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::MouseButton, input::Side};

/// State changes the engine announces to the injection layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlChange {
    TypingEnabled(bool),
    KeyboardMode(bool),
    ChordalShift(bool),
    /// The effective keymap layer changed
    Layer(usize),
}

/// Payload of a [DispatchEvent]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Key { key: String, modifiers: Vec<String> },
    MouseButton(MouseButton),
    Control(ControlChange),
}

impl fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchAction::Key { key, modifiers } => {
                if modifiers.is_empty() {
                    write!(f, "key({key})")
                } else {
                    write!(f, "key({}+{key})", modifiers.join("+"))
                }
            }
            DispatchAction::MouseButton(button) => write!(f, "mouse({button:?})"),
            DispatchAction::Control(change) => write!(f, "control({change:?})"),
        }
    }
}

/// A semantic output of the engine, handed to the injection layer in
/// emission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub side: Side,
    pub action: DispatchAction,
    pub label: String,
    pub timestamp_us: u64,
}

impl DispatchEvent {
    pub fn new(side: Side, action: DispatchAction, label: String, timestamp_us: u64) -> Self {
        Self {
            side,
            action,
            label,
            timestamp_us,
        }
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @{}",
            self.side, self.label, self.action, self.timestamp_us
        )
    }
}

/// Why an input was dropped instead of dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// A typing release resolved to no key
    OffKeyNoSnap,
    /// Pressure outside of the configured force band
    ForceGated,
    /// A typing contact moved too far to still be a key press
    DragCancel,
    /// Malformed contact in an otherwise valid frame
    InvalidContact,
    /// The dispatch queue was full
    EngineQueueFull,
    /// The raw report queue was full
    FrameQueueFull,
    /// Raw input arrived during a fault cooldown
    Cooldown,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::OffKeyNoSnap => "off_key_no_snap",
            DropReason::ForceGated => "force_gated",
            DropReason::DragCancel => "drag_cancel",
            DropReason::InvalidContact => "invalid_contact",
            DropReason::EngineQueueFull => "engine_queue_full",
            DropReason::FrameQueueFull => "frame_queue_full",
            DropReason::Cooldown => "cooldown",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
