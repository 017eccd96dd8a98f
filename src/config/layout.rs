//! Key layouts and keymaps. Layouts describe where keys are on each surface,
//! keymaps describe what they do.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Action, ConfigError, LoadError};
use crate::input::Side;

/// A key rectangle in millimetres. X/Y is the top-left corner.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct KeyRect {
    pub id: String,
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
}

impl KeyRect {
    pub fn new(id: &str, x_mm: f64, y_mm: f64, width_mm: f64, height_mm: f64) -> Self {
        Self {
            id: id.to_string(),
            x_mm,
            y_mm,
            width_mm,
            height_mm,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_mm
            && x < self.x_mm + self.width_mm
            && y >= self.y_mm
            && y < self.y_mm + self.height_mm
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x_mm + self.width_mm / 2.0,
            self.y_mm + self.height_mm / 2.0,
        )
    }

    pub fn min_dimension(&self) -> f64 {
        self.width_mm.min(self.height_mm)
    }

    pub fn distance_to_center(&self, x: f64, y: f64) -> f64 {
        let (cx, cy) = self.center();
        ((x - cx).powi(2) + (y - cy).powi(2)).sqrt()
    }
}

/// Outcome of resolving a release point against a layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyResolution<'a> {
    Hit(&'a KeyRect),
    Snapped(&'a KeyRect),
    /// The point was near a key, but too close to another to choose
    Ambiguous,
    Miss,
}

/// Key rectangles for both surfaces
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct KeyLayout {
    pub left: Vec<KeyRect>,
    pub right: Vec<KeyRect>,
}

impl KeyLayout {
    /// Load a [KeyLayout] from the given YAML string
    pub fn from_yaml(content: String) -> Result<KeyLayout, LoadError> {
        let layout: KeyLayout = serde_yaml::from_str(content.as_str())?;
        Ok(layout)
    }

    /// Load a [KeyLayout] from the given YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<KeyLayout, LoadError> {
        let file = std::fs::File::open(path)?;
        let layout: KeyLayout = serde_yaml::from_reader(file)?;
        Ok(layout)
    }

    /// A three row split layout with five columns per side, used when no
    /// layout file is given
    pub fn split_qwerty(width_mm: f64, height_mm: f64) -> Self {
        const LEFT: [[&str; 5]; 3] = [
            ["q", "w", "e", "r", "t"],
            ["a", "s", "d", "f", "g"],
            ["z", "x", "c", "v", "b"],
        ];
        const RIGHT: [[&str; 5]; 3] = [
            ["y", "u", "i", "o", "p"],
            ["h", "j", "k", "l", "semicolon"],
            ["n", "m", "comma", "period", "slash"],
        ];

        // Keep a margin around the grid for corners and pointer use
        let key_w = width_mm / 7.0;
        let key_h = height_mm / 5.0;
        let grid = |rows: &[[&str; 5]; 3]| {
            let mut keys = Vec::with_capacity(15);
            for (row, ids) in rows.iter().enumerate() {
                for (col, id) in ids.iter().enumerate() {
                    keys.push(KeyRect::new(
                        id,
                        key_w + col as f64 * key_w,
                        key_h + row as f64 * key_h,
                        key_w,
                        key_h,
                    ));
                }
            }
            keys
        };

        Self {
            left: grid(&LEFT),
            right: grid(&RIGHT),
        }
    }

    pub fn keys(&self, side: Side) -> &[KeyRect] {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Returns the key containing the given point
    pub fn hit_test(&self, side: Side, x: f64, y: f64) -> Option<&KeyRect> {
        self.keys(side).iter().find(|key| key.contains(x, y))
    }

    /// Resolve a release point: a direct hit wins, otherwise snap to the
    /// nearest key center within `radius_percent` of that key's shorter
    /// dimension, unless the runner-up is nearly as close.
    pub fn resolve(
        &self,
        side: Side,
        x: f64,
        y: f64,
        radius_percent: f64,
        ambiguity_ratio: f64,
    ) -> KeyResolution<'_> {
        if let Some(key) = self.hit_test(side, x, y) {
            return KeyResolution::Hit(key);
        }

        let mut best: Option<(&KeyRect, f64)> = None;
        let mut second: Option<f64> = None;
        for key in self.keys(side) {
            let distance = key.distance_to_center(x, y);
            match best {
                Some((_, best_distance)) if distance >= best_distance => {
                    if second.map_or(true, |d| distance < d) {
                        second = Some(distance);
                    }
                }
                _ => {
                    second = best.map(|(_, d)| d);
                    best = Some((key, distance));
                }
            }
        }

        let Some((key, distance)) = best else {
            return KeyResolution::Miss;
        };
        if distance > key.min_dimension() * radius_percent / 100.0 {
            return KeyResolution::Miss;
        }
        if let Some(second) = second {
            if second <= 0.0 || distance / second >= ambiguity_ratio {
                return KeyResolution::Ambiguous;
            }
        }

        KeyResolution::Snapped(key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for side in [Side::Left, Side::Right] {
            let mut seen = HashSet::new();
            for key in self.keys(side) {
                let dims = [key.x_mm, key.y_mm, key.width_mm, key.height_mm];
                if dims.iter().any(|v| !v.is_finite()) {
                    return Err(ConfigError::InvalidKey {
                        id: key.id.clone(),
                        reason: "coordinates must be finite".to_string(),
                    });
                }
                if key.width_mm <= 0.0 || key.height_mm <= 0.0 {
                    return Err(ConfigError::InvalidKey {
                        id: key.id.clone(),
                        reason: "size must be greater than zero".to_string(),
                    });
                }
                if !seen.insert(key.id.as_str()) {
                    return Err(ConfigError::DuplicateKey {
                        side,
                        id: key.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// What a single key does when tapped or held
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct KeyBinding {
    pub tap: Action,
    #[serde(default)]
    pub hold: Option<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct KeymapLayer {
    pub name: String,
    #[serde(default)]
    pub bindings: HashMap<String, KeyBinding>,
}

/// Ordered keymap layers. Layer 0 is the base layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default, rename_all = "snake_case")]
pub struct Keymap {
    pub layers: Vec<KeymapLayer>,
}

impl Default for Keymap {
    fn default() -> Self {
        Self {
            layers: vec![KeymapLayer {
                name: "base".to_string(),
                bindings: HashMap::new(),
            }],
        }
    }
}

impl Keymap {
    /// Load a [Keymap] from the given YAML string
    pub fn from_yaml(content: String) -> Result<Keymap, LoadError> {
        let keymap: Keymap = serde_yaml::from_str(content.as_str())?;
        Ok(keymap)
    }

    /// Load a [Keymap] from the given YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Keymap, LoadError> {
        let file = std::fs::File::open(path)?;
        let keymap: Keymap = serde_yaml::from_reader(file)?;
        Ok(keymap)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len().max(1)
    }

    /// Look up the binding for a key on the given layer, falling through to
    /// the base layer. Keys without a binding type themselves.
    pub fn binding(&self, layer: usize, key_id: &str) -> KeyBinding {
        let lookup = |idx: usize| {
            self.layers
                .get(idx)
                .and_then(|layer| layer.bindings.get(key_id))
        };
        lookup(layer)
            .or_else(|| lookup(0))
            .cloned()
            .unwrap_or_else(|| KeyBinding {
                tap: Action::key(key_id),
                hold: None,
            })
    }

    /// Check that every layer reference points to an existing layer
    pub fn validate(&self) -> Result<(), ConfigError> {
        let count = self.layer_count();
        for layer in &self.layers {
            for binding in layer.bindings.values() {
                let actions = std::iter::once(&binding.tap).chain(binding.hold.iter());
                for action in actions {
                    self.check_layer(action.layer(), count)?;
                }
            }
        }
        Ok(())
    }

    pub fn check_layer(&self, layer: Option<usize>, count: usize) -> Result<(), ConfigError> {
        match layer {
            Some(layer) if layer >= count => Err(ConfigError::UnknownLayer { layer, count }),
            _ => Ok(()),
        }
    }
}
