use crate::{
    config::{layout::KeyLayout, layout::KeyResolution, EngineConfig},
    input::{dispatch::event::DropReason, touch_table::TouchEntry, Side},
};

/// Modifier added to key dispatches while chordal shift is held
pub const SHIFT: &str = "shift";

/// Returns true if the contact's force is inside the configured band.
/// A zero cap rejects everything. Contacts from layouts without a pressure
/// signal are not gated.
pub fn force_allows(peak_pressure: Option<u8>, config: &EngineConfig) -> bool {
    if config.force_max == 0 {
        return false;
    }
    match peak_pressure {
        Some(pressure) => (config.force_min..=config.force_max).contains(&pressure),
        None => true,
    }
}

/// Resolve the release point of a typing contact to a key id
pub fn resolve_release(
    layout: &KeyLayout,
    side: Side,
    entry: &TouchEntry,
    config: &EngineConfig,
) -> Result<String, DropReason> {
    if !force_allows(entry.peak_pressure, config) {
        return Err(DropReason::ForceGated);
    }
    match layout.resolve(
        side,
        entry.x_mm,
        entry.y_mm,
        config.snap_radius_percent,
        config.snap_ambiguity_ratio,
    ) {
        KeyResolution::Hit(key) => Ok(key.id.clone()),
        KeyResolution::Snapped(key) => {
            log::trace!(
                "Snapped release at ({:.1}, {:.1}) to '{}'",
                entry.x_mm,
                entry.y_mm,
                key.id
            );
            Ok(key.id.clone())
        }
        KeyResolution::Ambiguous | KeyResolution::Miss => Err(DropReason::OffKeyNoSnap),
    }
}

/// Add the shift modifier to the given modifiers when chordal shift is held
pub fn with_shift(mut modifiers: Vec<String>, shift_active: bool) -> Vec<String> {
    if shift_active && !modifiers.iter().any(|m| m == SHIFT) {
        modifiers.push(SHIFT.to_string());
    }
    modifiers
}

/// How long the contact was on the surface
pub fn held_for_us(entry: &TouchEntry) -> u64 {
    entry.last_seen_us.saturating_sub(entry.first_seen_us)
}
