use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::EngineConfig, input::touch_table::TouchEntry, input::Side};

/// Fixed observation window before a candidate is classified
pub const INTENT_WINDOW_US: u64 = 20_000;

/// The engine's current classification of a touch episode on one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentMode {
    #[default]
    Idle,
    KeyCandidate,
    TypingCommitted,
    MouseCandidate,
    MouseActive,
    GestureCandidate,
}

impl IntentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentMode::Idle => "idle",
            IntentMode::KeyCandidate => "key_candidate",
            IntentMode::TypingCommitted => "typing_committed",
            IntentMode::MouseCandidate => "mouse_candidate",
            IntentMode::MouseActive => "mouse_active",
            IntentMode::GestureCandidate => "gesture_candidate",
        }
    }
}

impl fmt::Display for IntentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A change of [IntentMode] on one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub side: Side,
    pub from: IntentMode,
    pub to: IntentMode,
    pub at_us: u64,
}

/// What a single contact is being used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started over a key, not yet classified
    KeyCandidate,
    /// Will resolve to a key on release
    Typing,
    Pointer,
    /// Consumed by a gesture, never types
    Gesture,
    Ignored,
}

/// Engine-side bookkeeping for one live contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: u8,
    pub role: Role,
    /// Key under the contact when it began
    pub start_key: Option<String>,
    /// The hold binding has been evaluated for this contact
    pub hold_handled: bool,
    /// Layer this contact is holding active
    pub momentary_layer: Option<usize>,
}

impl Track {
    pub fn new(id: u8, role: Role, start_key: Option<String>) -> Self {
        Self {
            id,
            role,
            start_key,
            hold_handled: false,
            momentary_layer: None,
        }
    }
}

/// Result of observing candidate contacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Still inside the observation window
    Pending,
    Typing,
    Pointer,
}

/// Classify key candidates. Exceeding the move or drag-cancel distance is a
/// pointer immediately; otherwise the decision waits for the window to end
/// and then depends on the peak speed.
pub fn classify_key_candidates<'a>(
    entries: impl Iterator<Item = &'a TouchEntry>,
    since_us: u64,
    now: u64,
    config: &EngineConfig,
) -> CandidateOutcome {
    let move_limit = config.intent_move_mm.min(config.drag_cancel_mm);
    let mut too_fast = false;
    for entry in entries {
        if entry.max_travel_mm > move_limit {
            return CandidateOutcome::Pointer;
        }
        too_fast |= entry.peak_speed_mm_s > config.intent_velocity_mm_s;
    }

    if now.saturating_sub(since_us) < INTENT_WINDOW_US {
        return CandidateOutcome::Pending;
    }
    if too_fast {
        CandidateOutcome::Pointer
    } else {
        CandidateOutcome::Typing
    }
}

/// Pointer candidates become active on motion, on speed or once the window
/// elapses
pub fn pointer_is_active<'a>(
    mut entries: impl Iterator<Item = &'a TouchEntry>,
    since_us: u64,
    now: u64,
    config: &EngineConfig,
) -> bool {
    now.saturating_sub(since_us) >= INTENT_WINDOW_US
        || entries.any(|entry| {
            entry.max_travel_mm > config.intent_move_mm
                || entry.peak_speed_mm_s > config.intent_velocity_mm_s
        })
}

/// A key candidate released inside the window with little motion is a tap
pub fn is_quick_tap(entry: &TouchEntry, config: &EngineConfig) -> bool {
    entry.max_travel_mm <= config.intent_move_mm.min(config.drag_cancel_mm)
}
