use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::templates::VariableBindings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresetKind {
    #[default]
    Sprite,
    Prop,
    Tile,
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetConstraints {
    #[serde(default = "default_true", alias = "transparentBG")]
    pub transparent_bg: bool,
    #[serde(default, alias = "targetSize")]
    pub target_size: Option<(u32, u32)>,
    #[serde(default, alias = "paletteColors")]
    pub palette_colors: Option<u32>,
    #[serde(default)]
    pub avoid: Vec<String>,
}

impl Default for PresetConstraints {
    fn default() -> Self {
        Self {
            transparent_bg: true,
            target_size: None,
            palette_colors: None,
            avoid: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, alias = "topP")]
    pub top_p: Option<f64>,
    #[serde(default, alias = "topK")]
    pub top_k: Option<u32>,
}

/// A named prompt template plus the constraints its output must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: PresetKind,
    #[serde(default)]
    pub system: String,
    #[serde(default, alias = "userTemplate")]
    pub user_template: String,
    /// Allowed values per placeholder; the first entry is the default.
    #[serde(default)]
    pub variables: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub constraints: PresetConstraints,
    #[serde(default)]
    pub gen: Option<GenerationSettings>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Preset {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: PresetKind::default(),
            system: String::new(),
            user_template: String::new(),
            variables: BTreeMap::new(),
            constraints: PresetConstraints::default(),
            gen: None,
            notes: None,
            version: default_version(),
            active: true,
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.gen.as_ref().and_then(|g| g.temperature)
    }

    /// Bindings made of the first allowed value of every variable.
    pub fn default_bindings(&self) -> VariableBindings {
        self.variables
            .iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Default bindings overlaid with the caller's explicit choices.
    pub fn bindings_with_defaults(&self, explicit: &VariableBindings) -> VariableBindings {
        let mut merged = self.default_bindings();
        merged.extend(explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    fn validate(&self) -> Result<(), PresetCatalogError> {
        if self.id.trim().is_empty() {
            return Err(PresetCatalogError::InvalidPreset {
                id: self.id.clone(),
                message: String::from("id must not be empty"),
            });
        }
        if let Some((w, h)) = self.constraints.target_size {
            if w == 0 || h == 0 {
                return Err(PresetCatalogError::InvalidPreset {
                    id: self.id.clone(),
                    message: format!("target_size must be positive, got {w}x{h}"),
                });
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresetCatalogError {
    #[error("failed to read presets file '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse presets JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("failed to parse presets TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("duplicate preset id '{0}'")]
    DuplicateId(String),
    #[error("invalid preset '{id}': {message}")]
    InvalidPreset { id: String, message: String },
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    #[serde(default)]
    presets: Vec<Preset>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresetCatalog {
    presets: BTreeMap<String, Preset>,
}

impl PresetCatalog {
    pub fn builtin() -> Self {
        let mut presets = BTreeMap::new();
        for preset in builtin_presets() {
            presets.insert(preset.id.clone(), preset);
        }
        Self { presets }
    }

    pub fn from_presets(list: Vec<Preset>) -> Result<Self, PresetCatalogError> {
        let mut presets = BTreeMap::new();
        for preset in list {
            preset.validate()?;
            if presets.contains_key(preset.id.as_str()) {
                return Err(PresetCatalogError::DuplicateId(preset.id));
            }
            presets.insert(preset.id.clone(), preset);
        }
        Ok(Self { presets })
    }

    /// Loads presets from a `.toml` or `.json` file with a top-level `presets` list.
    pub fn load_from_path(path: &Path) -> Result<Self, PresetCatalogError> {
        let raw = fs::read_to_string(path).map_err(|e| PresetCatalogError::ReadFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let is_toml = path
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let parsed: PresetFile = if is_toml {
            toml::from_str(raw.as_str()).map_err(|e| PresetCatalogError::ParseToml {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(raw.as_str()).map_err(|e| PresetCatalogError::ParseJson {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        };
        Self::from_presets(parsed.presets)
    }

    pub fn get(&self, id: &str) -> Option<&Preset> {
        self.presets.get(id)
    }

    pub fn list(&self) -> Vec<&Preset> {
        self.presets.values().collect()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Inserts a new preset or replaces an existing one, bumping its version.
    pub fn upsert(&mut self, mut preset: Preset) -> Result<&Preset, PresetCatalogError> {
        preset.validate()?;
        let id = preset.id.clone();
        if let Some(existing) = self.presets.get(id.as_str()) {
            preset.version = existing.version.saturating_add(1);
        }
        self.presets.insert(id.clone(), preset);
        Ok(&self.presets[id.as_str()])
    }

    pub fn remove(&mut self, id: &str) -> Option<Preset> {
        self.presets.remove(id)
    }
}

fn variable(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn builtin_presets() -> Vec<Preset> {
    let mut sprite = Preset::new("pixel-sprite-32", "Pixel sprite 32x32");
    sprite.kind = PresetKind::Sprite;
    sprite.system = String::from(
        "You are a pixel artist producing game-ready sprites. Use a limited palette of at most {COLORS} colors, hard pixel edges and a fully transparent background.",
    );
    sprite.user_template = String::from(
        "Turn the sketch into a {STYLE} {SUBJECT} sprite facing {DIR}, exactly {W}x{H} pixels.",
    );
    sprite.variables.insert(String::from("STYLE"), variable(&["16-bit", "8-bit", "modern"]));
    sprite.variables.insert(String::from("SUBJECT"), variable(&["character", "monster", "npc"]));
    sprite.variables.insert(String::from("DIR"), variable(&["right", "left", "front", "back"]));
    sprite.variables.insert(String::from("COLORS"), variable(&["16", "8", "32"]));
    sprite.variables.insert(String::from("W"), variable(&["32"]));
    sprite.variables.insert(String::from("H"), variable(&["32"]));
    sprite.constraints = PresetConstraints {
        transparent_bg: true,
        target_size: Some((32, 32)),
        palette_colors: Some(16),
        avoid: variable(&["gradients", "drop shadows", "anti-aliasing"]),
    };
    sprite.gen = Some(GenerationSettings {
        temperature: Some(0.6),
        ..GenerationSettings::default()
    });

    let mut prop = Preset::new("pixel-prop-16", "Pixel prop 16x16");
    prop.kind = PresetKind::Prop;
    prop.system = String::from(
        "You are a pixel artist producing small game props with a transparent background and a {OUTLINE} outline.",
    );
    prop.user_template = String::from("Turn the sketch into a {SUBJECT} prop, exactly {W}x{H} pixels.");
    prop.variables.insert(String::from("SUBJECT"), variable(&["chest", "potion", "key", "sword"]));
    prop.variables.insert(String::from("OUTLINE"), variable(&["1px dark", "none"]));
    prop.variables.insert(String::from("W"), variable(&["16"]));
    prop.variables.insert(String::from("H"), variable(&["16"]));
    prop.constraints = PresetConstraints {
        transparent_bg: true,
        target_size: Some((16, 16)),
        palette_colors: Some(8),
        avoid: Vec::new(),
    };

    let mut tile = Preset::new("pixel-tile-32", "Seamless tile 32x32");
    tile.kind = PresetKind::Tile;
    tile.system = String::from(
        "You are a pixel artist producing seamless tiles. Edges must wrap on all four sides with no visible seams.",
    );
    tile.user_template = String::from("Turn the sketch into a {MATERIAL} floor tile.");
    tile.variables.insert(String::from("MATERIAL"), variable(&["stone", "grass", "wood", "sand"]));
    tile.variables.insert(String::from("W"), variable(&["32"]));
    tile.variables.insert(String::from("H"), variable(&["32"]));
    tile.constraints = PresetConstraints {
        transparent_bg: false,
        target_size: Some((32, 32)),
        palette_colors: Some(16),
        avoid: Vec::new(),
    };

    let mut background = Preset::new("painted-background", "Painted background");
    background.kind = PresetKind::Background;
    background.system = String::from(
        "You are a concept artist painting side-scroller backgrounds in a {STYLE} style.",
    );
    background.user_template = String::from("Paint the sketched scene as a {TIME} {SETTING}.");
    background.variables.insert(String::from("STYLE"), variable(&["hand-drawn", "flat vector"]));
    background.variables.insert(String::from("TIME"), variable(&["daytime", "sunset", "night"]));
    background.variables.insert(String::from("SETTING"), variable(&["forest", "desert", "city"]));
    background.constraints = PresetConstraints {
        transparent_bg: false,
        ..PresetConstraints::default()
    };

    vec![sprite, prop, tile, background]
}
