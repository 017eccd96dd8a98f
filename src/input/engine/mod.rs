//! Intent and gesture engine. Classifies each side's touch episodes as
//! typing, pointing or multi-finger gestures and turns them into dispatch
//! events. All state is mutated inside [Engine::apply] and [Engine::tick].

pub mod gesture;
pub mod intent;
pub mod keys;

#[cfg(test)]
mod engine_test;

use serde::Serialize;

use crate::{
    config::{
        layout::{KeyLayout, Keymap},
        Action, ConfigError, EngineConfig,
    },
    drivers::trackpad::Frame,
    input::{
        dispatch::event::{ControlChange, DispatchAction, DispatchEvent, DropReason},
        touch_table::{TouchEntry, TouchTable},
        Side,
    },
};

use gesture::{Corner, Episode, HeldGesture, SwipeDirection, HOLD_CONTACTS, SWIPE_CONTACTS};
pub use intent::{IntentMode, Transition, INTENT_WINDOW_US};
use intent::{CandidateOutcome, Role, Track};

/// Scheduled ticks fall on multiples of this interval of the engine clock.
/// Live processing and replay share the grid so both see the same ticks.
pub const TICK_INTERVAL_US: u64 = 5_000;

/// An input the engine decided not to dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineDrop {
    pub side: Side,
    pub reason: DropReason,
    pub contact_id: Option<u8>,
    pub at_us: u64,
}

/// Everything produced by a single apply or tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub transitions: Vec<Transition>,
    pub dispatches: Vec<DispatchEvent>,
    pub drops: Vec<EngineDrop>,
}

impl EngineOutput {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.dispatches.is_empty() && self.drops.is_empty()
    }

    pub fn extend(&mut self, other: EngineOutput) {
        self.transitions.extend(other.transitions);
        self.dispatches.extend(other.dispatches);
        self.drops.extend(other.drops);
    }

    fn push_drop(&mut self, side: Side, reason: DropReason, contact_id: Option<u8>, at_us: u64) {
        log::debug!("Dropped {side} contact {contact_id:?}: {reason}");
        self.drops.push(EngineDrop {
            side,
            reason,
            contact_id,
            at_us,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SideSnapshot {
    pub mode: IntentMode,
    pub active_contacts: usize,
}

/// Immutable view of the engine state for observers
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct EngineSnapshot {
    pub left: SideSnapshot,
    pub right: SideSnapshot,
    pub active_layer: usize,
    pub typing_enabled: bool,
    pub keyboard_mode: bool,
    pub momentary_layer_active: bool,
    pub chordal_shift_active: bool,
    pub timestamp_us: u64,
}

impl EngineSnapshot {
    pub fn side(&self, side: Side) -> &SideSnapshot {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }
}

/// What is keeping a momentary layer active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerHolder {
    Contact(Side, u8),
    Gesture(Side),
}

#[derive(Debug, Clone, Copy)]
struct MomentaryLayer {
    holder: LayerHolder,
    layer: usize,
}

/// State shared by both sides
#[derive(Debug, Clone)]
struct Modes {
    typing_enabled: bool,
    keyboard_mode: bool,
    active_layer: usize,
    momentary: Option<MomentaryLayer>,
    chordal_shift: bool,
}

impl Modes {
    fn from_config(config: &EngineConfig) -> Self {
        Self {
            typing_enabled: config.typing_enabled,
            keyboard_mode: config.keyboard_mode,
            active_layer: 0,
            momentary: None,
            chordal_shift: false,
        }
    }
}

#[derive(Debug, Clone)]
struct SideState {
    mode: IntentMode,
    mode_since_us: u64,
    table: TouchTable,
    tracks: Vec<Track>,
    episode: Option<Episode>,
    grace_until_us: u64,
}

impl SideState {
    fn new(config: &EngineConfig) -> Self {
        Self {
            mode: IntentMode::Idle,
            mode_since_us: 0,
            table: TouchTable::new(
                config.decoder.target(),
                config.mm_per_unit(),
                config.contact_liveness_ms * 1000,
            ),
            tracks: Vec::new(),
            episode: None,
            grace_until_us: 0,
        }
    }

    fn reset(&mut self) {
        self.mode = IntentMode::Idle;
        self.mode_since_us = 0;
        self.table.clear();
        self.tracks.clear();
        self.episode = None;
        self.grace_until_us = 0;
    }

    /// Nothing is pending, so ticks cannot change anything
    fn is_quiescent(&self) -> bool {
        self.mode == IntentMode::Idle && self.table.is_empty() && self.episode.is_none()
    }

    fn track_mut(&mut self, id: u8) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.id == id)
    }

    fn entries_with_role(&self, role: Role) -> impl Iterator<Item = &TouchEntry> {
        self.tracks
            .iter()
            .filter(move |track| track.role == role)
            .filter_map(move |track| self.table.get(track.id))
    }
}

/// The intent and gesture engine for both sides of the device
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    layout: KeyLayout,
    keymap: Keymap,
    sides: [SideState; 2],
    modes: Modes,
    clock_us: u64,
    last_tick_us: u64,
}

impl Engine {
    /// Create a new engine. Fails if the configuration, layout or keymap is
    /// invalid.
    pub fn new(config: EngineConfig, layout: KeyLayout, keymap: Keymap) -> Result<Self, ConfigError> {
        Self::validate(&config, &layout, &keymap)?;
        Ok(Self {
            sides: [SideState::new(&config), SideState::new(&config)],
            modes: Modes::from_config(&config),
            config,
            layout,
            keymap,
            clock_us: 0,
            last_tick_us: 0,
        })
    }

    fn validate(config: &EngineConfig, layout: &KeyLayout, keymap: &Keymap) -> Result<(), ConfigError> {
        config.validate()?;
        layout.validate()?;
        keymap.validate()?;
        let count = keymap.layer_count();
        for layer in config.referenced_layers() {
            keymap.check_layer(Some(layer), count)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn mode(&self, side: Side) -> IntentMode {
        self.sides[side.index()].mode
    }

    pub fn active_contacts(&self, side: Side) -> usize {
        self.sides[side.index()].table.len()
    }

    /// Replace the configuration. Touch state is cleared since the surface
    /// geometry may have changed.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<(), ConfigError> {
        Self::validate(&config, &self.layout, &self.keymap)?;
        self.sides = [SideState::new(&config), SideState::new(&config)];
        self.modes = Modes::from_config(&config);
        self.config = config;
        log::info!("Engine reconfigured");
        Ok(())
    }

    /// Replace the key layout and keymap. Takes effect on the next frame.
    pub fn set_layout(&mut self, layout: KeyLayout, keymap: Keymap) -> Result<(), ConfigError> {
        Self::validate(&self.config, &layout, &keymap)?;
        let count = keymap.layer_count();
        if self.modes.active_layer >= count {
            self.modes.active_layer = 0;
        }
        if self.modes.momentary.is_some_and(|m| m.layer >= count) {
            self.modes.momentary = None;
        }
        self.layout = layout;
        self.keymap = keymap;
        log::info!("Engine layout updated");
        Ok(())
    }

    /// Clear touch tables, intent modes and held modifiers on both sides
    pub fn reset_state(&mut self) {
        for state in self.sides.iter_mut() {
            state.reset();
        }
        self.modes.momentary = None;
        self.modes.chordal_shift = false;
        log::debug!("Engine state reset");
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let side = |side: Side| SideSnapshot {
            mode: self.mode(side),
            active_contacts: self.active_contacts(side),
        };
        EngineSnapshot {
            left: side(Side::Left),
            right: side(Side::Right),
            active_layer: self.effective_layer(),
            typing_enabled: self.modes.typing_enabled,
            keyboard_mode: self.modes.keyboard_mode,
            momentary_layer_active: self.modes.momentary.is_some(),
            chordal_shift_active: self.modes.chordal_shift,
            timestamp_us: self.clock_us,
        }
    }

    /// Apply one decoded frame to the given side
    pub fn apply(&mut self, side: Side, frame: &Frame) -> EngineOutput {
        let now = self.advance_clock(frame.arrival_timestamp);
        let mut frame = *frame;
        frame.arrival_timestamp = now;

        let mut out = EngineOutput::default();
        let changes = self.sides[side.index()].table.update(&frame);
        if !changes.is_empty() {
            log::trace!("{side} touch changes: {changes:?}");
        }
        for id in changes.invalid.iter() {
            out.push_drop(side, DropReason::InvalidContact, Some(*id), now);
        }

        self.release(side, &changes.ended, now, &mut out);
        self.begin(side, &changes.began, now, &mut out);
        self.advance(side, now, &mut out);

        out
    }

    /// Advance time without a frame: expire stale contacts, resolve
    /// candidates whose window elapsed and end typing grace
    pub fn tick(&mut self, now: u64) -> EngineOutput {
        let now = self.advance_clock(now);
        let mut out = EngineOutput::default();
        for side in Side::ALL {
            let ended = self.sides[side.index()].table.expire(now);
            self.release(side, &ended, now, &mut out);
            self.advance(side, now, &mut out);
        }
        out
    }

    /// Time of the last scheduled tick
    pub fn last_tick_us(&self) -> u64 {
        self.last_tick_us
    }

    /// Run every scheduled tick up to and including `now` that has not run
    /// yet. While nothing is pending the remaining ticks are skipped.
    pub fn advance_to(&mut self, now: u64) -> EngineOutput {
        let mut out = EngineOutput::default();
        let target = now - now % TICK_INTERVAL_US;
        let mut at = self.last_tick_us + TICK_INTERVAL_US;
        while at <= target {
            if self.sides.iter().all(SideState::is_quiescent) {
                break;
            }
            out.extend(self.tick(at));
            self.last_tick_us = at;
            at += TICK_INTERVAL_US;
        }
        if target > self.last_tick_us {
            self.last_tick_us = target;
            self.advance_clock(target);
        }
        out
    }

    fn advance_clock(&mut self, now: u64) -> u64 {
        self.clock_us = self.clock_us.max(now);
        self.clock_us
    }

    fn effective_layer(&self) -> usize {
        self.modes
            .momentary
            .map(|m| m.layer)
            .unwrap_or(self.modes.active_layer)
    }

    fn set_mode(&mut self, side: Side, to: IntentMode, now: u64, out: &mut EngineOutput) {
        let state = &mut self.sides[side.index()];
        if state.mode == to {
            return;
        }
        let from = state.mode;
        state.mode = to;
        state.mode_since_us = now;
        log::debug!("{side} intent {from} -> {to}");
        out.transitions.push(Transition {
            side,
            from,
            to,
            at_us: now,
        });
    }

    fn emit(&self, side: Side, action: DispatchAction, label: String, now: u64, out: &mut EngineOutput) {
        log::debug!("Dispatch {side} {label}: {action}");
        out.dispatches
            .push(DispatchEvent::new(side, action, label, now));
    }

    /// Carry out an action. Returns true if something was dispatched.
    fn perform(&mut self, side: Side, action: &Action, label: String, now: u64, out: &mut EngineOutput) -> bool {
        let shift = self.modes.chordal_shift;
        let dispatch = match action {
            Action::None | Action::MomentaryLayer { .. } => return false,
            Action::Key { key } => DispatchAction::Key {
                key: key.clone(),
                modifiers: keys::with_shift(Vec::new(), shift),
            },
            Action::Chord { modifiers, key } => DispatchAction::Key {
                key: key.clone(),
                modifiers: keys::with_shift(modifiers.clone(), shift),
            },
            Action::MouseButton { button } => DispatchAction::MouseButton(*button),
            Action::ChordalShift => {
                if !self.config.chordal_shift {
                    return false;
                }
                self.modes.chordal_shift = !shift;
                DispatchAction::Control(ControlChange::ChordalShift(!shift))
            }
            Action::ToggleTyping => {
                self.modes.typing_enabled = !self.modes.typing_enabled;
                log::info!("Typing enabled: {}", self.modes.typing_enabled);
                DispatchAction::Control(ControlChange::TypingEnabled(self.modes.typing_enabled))
            }
            Action::ToggleKeyboardMode => {
                self.modes.keyboard_mode = !self.modes.keyboard_mode;
                log::info!("Keyboard mode: {}", self.modes.keyboard_mode);
                DispatchAction::Control(ControlChange::KeyboardMode(self.modes.keyboard_mode))
            }
            Action::LayerToggle { layer } => {
                self.modes.active_layer = if self.modes.active_layer == *layer {
                    0
                } else {
                    *layer
                };
                DispatchAction::Control(ControlChange::Layer(self.effective_layer()))
            }
        };
        self.emit(side, dispatch, label, now, out);
        true
    }

    fn activate_momentary(
        &mut self,
        holder: LayerHolder,
        layer: usize,
        side: Side,
        now: u64,
        out: &mut EngineOutput,
    ) -> bool {
        if self.modes.momentary.is_some() {
            return false;
        }
        self.modes.momentary = Some(MomentaryLayer { holder, layer });
        self.emit(
            side,
            DispatchAction::Control(ControlChange::Layer(layer)),
            format!("momentary_layer:{layer}"),
            now,
            out,
        );
        true
    }

    fn release_momentary(&mut self, holder: LayerHolder, side: Side, now: u64, out: &mut EngineOutput) {
        if !self.modes.momentary.is_some_and(|m| m.holder == holder) {
            return;
        }
        self.modes.momentary = None;
        let layer = self.effective_layer();
        self.emit(
            side,
            DispatchAction::Control(ControlChange::Layer(layer)),
            "momentary_layer_release".to_string(),
            now,
            out,
        );
    }

    /// Handle contacts that lifted or expired
    fn release(&mut self, side: Side, ended: &[TouchEntry], now: u64, out: &mut EngineOutput) {
        if ended.is_empty() {
            return;
        }
        let idx = side.index();
        for entry in ended {
            if let Some(episode) = self.sides[idx].episode.as_mut() {
                episode.on_release(entry, now);
            }
            let tracks = &mut self.sides[idx].tracks;
            let Some(pos) = tracks.iter().position(|t| t.id == entry.id) else {
                continue;
            };
            let track = tracks.remove(pos);
            if track.momentary_layer.is_some() {
                self.release_momentary(LayerHolder::Contact(side, track.id), side, now, out);
            }

            match track.role {
                Role::KeyCandidate if intent::is_quick_tap(entry, &self.config) => {
                    self.commit_typing(side, now, out);
                    self.type_release(side, &track, entry, now, out);
                }
                Role::Typing => self.type_release(side, &track, entry, now, out),
                _ => {}
            }
        }

        if self.sides[idx].table.is_empty() {
            self.end_episode(side, now, out);
        }
    }

    /// Resolve a typing contact's release into a key dispatch
    fn type_release(&mut self, side: Side, track: &Track, entry: &TouchEntry, now: u64, out: &mut EngineOutput) {
        if track.momentary_layer.is_some() {
            return;
        }
        let key = match keys::resolve_release(&self.layout, side, entry, &self.config) {
            Ok(key) => key,
            Err(reason) => {
                out.push_drop(side, reason, Some(entry.id), now);
                return;
            }
        };

        let binding = self.keymap.binding(self.effective_layer(), &key);
        let held = keys::held_for_us(entry) >= self.config.hold_duration_ms * 1000;
        let (action, label) = match binding.hold {
            Some(hold) if held => (hold, format!("hold:{key}")),
            _ => (binding.tap, format!("key:{key}")),
        };
        if self.perform(side, &action, label, now, out) {
            let state = &mut self.sides[side.index()];
            state.grace_until_us = now + self.config.typing_grace_ms * 1000;
            if let Some(episode) = state.episode.as_mut() {
                episode.typed = true;
            }
        }
    }

    /// Handle contacts that appeared in this frame
    fn begin(&mut self, side: Side, began: &[u8], now: u64, out: &mut EngineOutput) {
        if began.is_empty() {
            return;
        }
        let idx = side.index();
        for id in began {
            let state = &mut self.sides[idx];
            let Some(entry) = state.table.get(*id).copied() else {
                continue;
            };
            let live = state.table.len();
            let episode = state.episode.get_or_insert_with(|| Episode::new(now));
            episode.on_begin(now, live);
            if episode.total_contacts == 1
                && self.layout.hit_test(side, entry.x_mm, entry.y_mm).is_none()
            {
                episode.corner = Corner::at(entry.x_mm, entry.y_mm, &self.config);
            }
        }

        let state = &self.sides[idx];
        let gesture = state.mode == IntentMode::GestureCandidate
            || gesture::starts_gesture(state.table.iter(), now, INTENT_WINDOW_US);
        if gesture {
            self.enter_gesture(side, began, now, out);
            return;
        }

        for id in began {
            self.begin_contact(side, *id, now, out);
        }
    }

    /// Consume the side's contacts as part of a gesture. Contacts already
    /// committed to typing keep their role and still type on release.
    fn enter_gesture(&mut self, side: Side, began: &[u8], now: u64, out: &mut EngineOutput) {
        let state = &mut self.sides[side.index()];
        for id in began {
            state.tracks.push(Track::new(*id, Role::Gesture, None));
        }
        let mut held_layers = Vec::new();
        for track in state.tracks.iter_mut().filter(|t| t.role != Role::Typing) {
            track.role = Role::Gesture;
            if track.momentary_layer.take().is_some() {
                held_layers.push(track.id);
            }
        }
        if let Some(episode) = state.episode.as_mut() {
            episode.gesture = true;
        }

        for id in held_layers {
            self.release_momentary(LayerHolder::Contact(side, id), side, now, out);
        }
        self.set_mode(side, IntentMode::GestureCandidate, now, out);
    }

    fn begin_contact(&mut self, side: Side, id: u8, now: u64, out: &mut EngineOutput) {
        let idx = side.index();
        let Some(entry) = self.sides[idx].table.get(id).copied() else {
            return;
        };
        let start_key = self
            .layout
            .hit_test(side, entry.x_mm, entry.y_mm)
            .map(|key| key.id.clone());
        let on_key = start_key.is_some();
        let mode = self.sides[idx].mode;

        let role = if !self.modes.typing_enabled {
            if mode == IntentMode::Idle {
                self.set_mode(side, IntentMode::MouseCandidate, now, out);
            }
            Role::Pointer
        } else {
            match mode {
                IntentMode::Idle if on_key => {
                    self.set_mode(side, IntentMode::KeyCandidate, now, out);
                    Role::KeyCandidate
                }
                IntentMode::Idle if self.modes.keyboard_mode => Role::Ignored,
                IntentMode::Idle => {
                    self.set_mode(side, IntentMode::MouseCandidate, now, out);
                    Role::Pointer
                }
                IntentMode::KeyCandidate if on_key => Role::KeyCandidate,
                IntentMode::TypingCommitted if on_key => Role::Typing,
                IntentMode::KeyCandidate | IntentMode::TypingCommitted => Role::Ignored,
                IntentMode::MouseCandidate | IntentMode::MouseActive => Role::Pointer,
                IntentMode::GestureCandidate => Role::Gesture,
            }
        };
        log::trace!("{side} contact {id} began as {role:?} over {start_key:?}");

        self.sides[idx].tracks.push(Track::new(id, role, start_key));
        if role == Role::Typing {
            self.on_typing(side, id, now, out);
        }
    }

    /// A contact became a typing contact. Keys whose tap binding is a
    /// momentary layer activate it right away.
    fn on_typing(&mut self, side: Side, id: u8, now: u64, out: &mut EngineOutput) {
        let Some(track) = self.sides[side.index()].track_mut(id) else {
            return;
        };
        let Some(key) = track.start_key.clone() else {
            return;
        };
        let binding = self.keymap.binding(self.effective_layer(), &key);
        let Action::MomentaryLayer { layer } = binding.tap else {
            return;
        };
        if self.activate_momentary(LayerHolder::Contact(side, id), layer, side, now, out) {
            if let Some(track) = self.sides[side.index()].track_mut(id) {
                track.momentary_layer = Some(layer);
                track.hold_handled = true;
            }
        }
    }

    fn commit_typing(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        if self.sides[side.index()].mode == IntentMode::KeyCandidate {
            self.set_mode(side, IntentMode::TypingCommitted, now, out);
        }
        let mut committed = Vec::new();
        for track in self.sides[side.index()].tracks.iter_mut() {
            if track.role == Role::KeyCandidate {
                track.role = Role::Typing;
                committed.push(track.id);
            }
        }
        for id in committed {
            self.on_typing(side, id, now, out);
        }
    }

    fn start_pointer(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        for track in self.sides[side.index()].tracks.iter_mut() {
            if track.role == Role::KeyCandidate {
                track.role = Role::Pointer;
            }
        }
        self.set_mode(side, IntentMode::MouseActive, now, out);
    }

    /// Time and motion driven updates for one side
    fn advance(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        self.classify_candidates(side, now, out);
        self.update_typing(side, now, out);
        self.detect_hold(side, now, out);
        self.detect_swipe(side, now, out);
        self.settle(side, now, out);
    }

    fn classify_candidates(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        let state = &self.sides[side.index()];
        match state.mode {
            IntentMode::KeyCandidate => {
                let mut candidates = state.entries_with_role(Role::KeyCandidate).peekable();
                if candidates.peek().is_none() {
                    drop(candidates);
                    self.set_mode(side, IntentMode::Idle, now, out);
                    return;
                }
                match intent::classify_key_candidates(candidates, state.mode_since_us, now, &self.config) {
                    CandidateOutcome::Pending => (),
                    CandidateOutcome::Typing => self.commit_typing(side, now, out),
                    CandidateOutcome::Pointer => self.start_pointer(side, now, out),
                }
            }
            IntentMode::MouseCandidate => {
                let pointers = state.entries_with_role(Role::Pointer);
                if intent::pointer_is_active(pointers, state.mode_since_us, now, &self.config) {
                    self.set_mode(side, IntentMode::MouseActive, now, out);
                }
            }
            _ => (),
        }
    }

    /// Drag cancellation and hold detection for typing contacts
    fn update_typing(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        let state = &self.sides[side.index()];
        let hold_us = self.config.hold_duration_ms * 1000;
        let mut cancelled = Vec::new();
        let mut holds = Vec::new();
        for track in state.tracks.iter().filter(|t| t.role == Role::Typing) {
            let Some(entry) = state.table.get(track.id) else {
                continue;
            };
            if entry.max_travel_mm > self.config.drag_cancel_mm {
                cancelled.push((track.id, track.momentary_layer.is_some()));
            } else if !track.hold_handled && entry.age_us(now) >= hold_us {
                let key = self
                    .layout
                    .hit_test(side, entry.x_mm, entry.y_mm)
                    .map(|key| key.id.clone())
                    .or_else(|| track.start_key.clone());
                holds.push((track.id, key));
            }
        }

        for (id, holding_layer) in cancelled {
            if let Some(track) = self.sides[side.index()].track_mut(id) {
                track.role = Role::Ignored;
                track.momentary_layer = None;
            }
            if holding_layer {
                self.release_momentary(LayerHolder::Contact(side, id), side, now, out);
            }
            out.push_drop(side, DropReason::DragCancel, Some(id), now);
        }

        for (id, key) in holds {
            if let Some(track) = self.sides[side.index()].track_mut(id) {
                track.hold_handled = true;
            }
            let Some(key) = key else {
                continue;
            };
            let binding = self.keymap.binding(self.effective_layer(), &key);
            let Some(Action::MomentaryLayer { layer }) = binding.hold else {
                continue;
            };
            if self.activate_momentary(LayerHolder::Contact(side, id), layer, side, now, out) {
                if let Some(track) = self.sides[side.index()].track_mut(id) {
                    track.momentary_layer = Some(layer);
                }
            }
        }
    }

    /// Four finger hold. Fires once per episode after the hold duration and
    /// keeps chordal shift or a momentary layer active until a finger lifts.
    fn detect_hold(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        let state = &mut self.sides[side.index()];
        let live = state.table.len();
        let travel = gesture::max_travel(state.table.iter());
        let Some(episode) = state.episode.as_mut() else {
            return;
        };

        if live != HOLD_CONTACTS {
            episode.four_since_us = None;
            self.end_hold(side, now, out);
            return;
        }

        let since = *episode.four_since_us.get_or_insert(now);
        if episode.hold_fired
            || now.saturating_sub(since) < self.config.hold_duration_ms * 1000
            || travel > self.config.drag_cancel_mm
        {
            return;
        }
        episode.hold_fired = true;
        episode.fired = true;

        let label = "four_finger_hold".to_string();
        match self.config.gestures.four_finger_hold.clone() {
            Action::ChordalShift => {
                if !self.config.chordal_shift || self.modes.chordal_shift {
                    return;
                }
                self.modes.chordal_shift = true;
                if let Some(episode) = self.sides[side.index()].episode.as_mut() {
                    episode.held = Some(HeldGesture::ChordalShift);
                }
                self.emit(
                    side,
                    DispatchAction::Control(ControlChange::ChordalShift(true)),
                    label,
                    now,
                    out,
                );
            }
            Action::MomentaryLayer { layer } => {
                if self.activate_momentary(LayerHolder::Gesture(side), layer, side, now, out) {
                    if let Some(episode) = self.sides[side.index()].episode.as_mut() {
                        episode.held = Some(HeldGesture::Layer(layer));
                    }
                }
            }
            action => {
                self.perform(side, &action, label, now, out);
            }
        }
    }

    fn end_hold(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        let held = self.sides[side.index()]
            .episode
            .as_mut()
            .and_then(|episode| episode.held.take());
        match held {
            Some(HeldGesture::ChordalShift) => {
                if self.modes.chordal_shift {
                    self.modes.chordal_shift = false;
                    self.emit(
                        side,
                        DispatchAction::Control(ControlChange::ChordalShift(false)),
                        "four_finger_hold_release".to_string(),
                        now,
                        out,
                    );
                }
            }
            Some(HeldGesture::Layer(_)) => {
                self.release_momentary(LayerHolder::Gesture(side), side, now, out)
            }
            None => (),
        }
    }

    /// Five finger swipe. The centroid travel along the dominant axis picks
    /// the direction; fires once per episode.
    fn detect_swipe(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        let state = &mut self.sides[side.index()];
        let live = state.table.len();
        let centroid = state.table.centroid();
        let Some(episode) = state.episode.as_mut() else {
            return;
        };

        if live < SWIPE_CONTACTS {
            if !episode.swipe_fired {
                episode.swipe_origin = None;
            }
            return;
        }
        let Some((cx, cy)) = centroid else {
            return;
        };
        let (ox, oy) = *episode.swipe_origin.get_or_insert((cx, cy));
        if episode.swipe_fired {
            return;
        }
        let Some(direction) =
            SwipeDirection::from_delta(cx - ox, cy - oy, self.config.swipe_distance_mm)
        else {
            return;
        };
        episode.swipe_fired = true;
        episode.fired = true;

        let action = direction.binding(&self.config.gestures).clone();
        self.perform(side, &action, direction.label().to_string(), now, out);
    }

    /// All contacts lifted: evaluate taps and settle the mode
    fn end_episode(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        self.end_hold(side, now, out);
        let Some(episode) = self.sides[side.index()].episode.take() else {
            return;
        };

        if let Some(tap) = episode.tap(&self.config) {
            let action = tap.binding(&self.config.gestures).clone();
            self.perform(side, &action, tap.label().to_string(), now, out);
        } else if let Some(corner) = episode.corner_tap(&self.config) {
            let action = corner.binding(&self.config.gestures).clone();
            self.perform(side, &action, corner.label().to_string(), now, out);
        }

        let grace = self.config.typing_grace_ms * 1000;
        let state = &mut self.sides[side.index()];
        if state.mode == IntentMode::TypingCommitted {
            state.grace_until_us = state.grace_until_us.max(now + grace);
        } else {
            self.set_mode(side, IntentMode::Idle, now, out);
        }
    }

    fn settle(&mut self, side: Side, now: u64, out: &mut EngineOutput) {
        let state = &self.sides[side.index()];
        let live = state.table.len();
        let mode = state.mode;
        if mode == IntentMode::GestureCandidate && live < 2 {
            self.set_mode(side, IntentMode::Idle, now, out);
            return;
        }
        if live > 0 {
            return;
        }
        match mode {
            IntentMode::Idle => (),
            IntentMode::TypingCommitted if now < state.grace_until_us => (),
            _ => self.set_mode(side, IntentMode::Idle, now, out),
        }
    }
}
