//! Multi-finger gesture detection. These run alongside intent classification
//! and only look at contact counts, timing and centroid motion.

use crate::{
    config::{Action, EngineConfig, GestureBindings},
    input::touch_table::TouchEntry,
};

/// Number of contacts that make up each gesture
pub const HOLD_CONTACTS: usize = 4;
pub const SWIPE_CONTACTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    /// Returns the corner zone containing the point, if any
    pub fn at(x_mm: f64, y_mm: f64, config: &EngineConfig) -> Option<Corner> {
        let zone = config.corner_zone_mm;
        if zone <= 0.0 {
            return None;
        }
        let left = x_mm <= zone;
        let right = x_mm >= config.surface.width_mm - zone;
        let top = y_mm <= zone;
        let bottom = y_mm >= config.surface.height_mm - zone;
        match (left, right, top, bottom) {
            (true, _, true, _) => Some(Corner::TopLeft),
            (_, true, true, _) => Some(Corner::TopRight),
            (true, _, _, true) => Some(Corner::BottomLeft),
            (_, true, _, true) => Some(Corner::BottomRight),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Corner::TopLeft => "corner_top_left",
            Corner::TopRight => "corner_top_right",
            Corner::BottomLeft => "corner_bottom_left",
            Corner::BottomRight => "corner_bottom_right",
        }
    }

    pub fn binding<'a>(&self, bindings: &'a GestureBindings) -> &'a Action {
        match self {
            Corner::TopLeft => &bindings.corner_top_left,
            Corner::TopRight => &bindings.corner_top_right,
            Corner::BottomLeft => &bindings.corner_bottom_left,
            Corner::BottomRight => &bindings.corner_bottom_right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

impl SwipeDirection {
    /// Direction of the dominant axis once the travel reaches the distance.
    /// Y grows downwards.
    pub fn from_delta(dx: f64, dy: f64, distance_mm: f64) -> Option<SwipeDirection> {
        if dx.abs() >= dy.abs() {
            if dx.abs() < distance_mm {
                return None;
            }
            Some(if dx < 0.0 {
                SwipeDirection::Left
            } else {
                SwipeDirection::Right
            })
        } else {
            if dy.abs() < distance_mm {
                return None;
            }
            Some(if dy < 0.0 {
                SwipeDirection::Up
            } else {
                SwipeDirection::Down
            })
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SwipeDirection::Left => "five_finger_swipe_left",
            SwipeDirection::Right => "five_finger_swipe_right",
            SwipeDirection::Up => "five_finger_swipe_up",
            SwipeDirection::Down => "five_finger_swipe_down",
        }
    }

    pub fn binding<'a>(&self, bindings: &'a GestureBindings) -> &'a Action {
        match self {
            SwipeDirection::Left => &bindings.five_finger_swipe_left,
            SwipeDirection::Right => &bindings.five_finger_swipe_right,
            SwipeDirection::Up => &bindings.five_finger_swipe_up,
            SwipeDirection::Down => &bindings.five_finger_swipe_down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapGesture {
    TwoFinger,
    ThreeFinger,
}

impl TapGesture {
    pub fn label(&self) -> &'static str {
        match self {
            TapGesture::TwoFinger => "two_finger_tap",
            TapGesture::ThreeFinger => "three_finger_tap",
        }
    }

    pub fn binding<'a>(&self, bindings: &'a GestureBindings) -> &'a Action {
        match self {
            TapGesture::TwoFinger => &bindings.two_finger_tap,
            TapGesture::ThreeFinger => &bindings.three_finger_tap,
        }
    }
}

/// What the four finger hold is currently keeping active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeldGesture {
    ChordalShift,
    Layer(usize),
}

/// Everything that happened between the first contact landing on a side and
/// the last one lifting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Episode {
    pub first_begin_us: u64,
    pub last_begin_us: u64,
    pub last_release_us: u64,
    /// Contacts that began during the episode
    pub total_contacts: usize,
    pub max_live: usize,
    pub max_travel_mm: f64,
    /// Entered gesture candidacy at some point
    pub gesture: bool,
    /// A hold or swipe fired, so no tap may fire
    pub fired: bool,
    /// A typing contact dispatched a key during the episode
    pub typed: bool,
    pub corner: Option<Corner>,
    pub four_since_us: Option<u64>,
    pub held: Option<HeldGesture>,
    pub hold_fired: bool,
    pub swipe_origin: Option<(f64, f64)>,
    pub swipe_fired: bool,
}

impl Episode {
    pub fn new(now: u64) -> Self {
        Self {
            first_begin_us: now,
            last_begin_us: now,
            last_release_us: now,
            ..Default::default()
        }
    }

    pub fn on_begin(&mut self, now: u64, live: usize) {
        self.last_begin_us = now;
        self.total_contacts += 1;
        self.max_live = self.max_live.max(live);
    }

    pub fn on_release(&mut self, entry: &TouchEntry, now: u64) {
        self.last_release_us = self.last_release_us.max(now);
        self.max_travel_mm = self.max_travel_mm.max(entry.max_travel_mm);
    }

    /// Evaluate the tap gestures once every contact has lifted
    pub fn tap(&self, config: &EngineConfig) -> Option<TapGesture> {
        if !self.gesture || self.fired || self.typed || self.total_contacts != self.max_live {
            return None;
        }
        let kind = match self.max_live {
            2 => TapGesture::TwoFinger,
            3 => TapGesture::ThreeFinger,
            _ => return None,
        };
        let duration = self.last_release_us.saturating_sub(self.first_begin_us);
        let stagger = self.last_begin_us.saturating_sub(self.first_begin_us);
        if duration > config.tap_cadence_ms * 1000
            || stagger > config.tap_stagger_tolerance_ms * 1000
            || self.max_travel_mm > config.tap_move_mm
        {
            log::trace!(
                "Not a tap: duration {duration}us, stagger {stagger}us, travel {:.2}mm",
                self.max_travel_mm
            );
            return None;
        }
        Some(kind)
    }

    /// Evaluate a single finger corner tap once the contact has lifted
    pub fn corner_tap(&self, config: &EngineConfig) -> Option<Corner> {
        if self.total_contacts != 1 || self.gesture {
            return None;
        }
        let corner = self.corner?;
        let duration = self.last_release_us.saturating_sub(self.first_begin_us);
        if duration > config.tap_cadence_ms * 1000 || self.max_travel_mm > config.tap_move_mm {
            return None;
        }
        Some(corner)
    }
}

/// Two or more live contacts that landed within `window_us` of each other,
/// counting back from `now`. Contacts that began earlier are rollover typing
/// or a resting pointer and never start a gesture on their own.
pub fn starts_gesture<'a>(entries: impl Iterator<Item = &'a TouchEntry>, now: u64, window_us: u64) -> bool {
    entries
        .filter(|e| now.saturating_sub(e.first_seen_us) <= window_us)
        .count()
        >= 2
}

/// Largest travel of any live contact
pub fn max_travel<'a>(entries: impl Iterator<Item = &'a TouchEntry>) -> f64 {
    entries.fold(0.0, |acc, e| acc.max(e.max_travel_mm))
}
