use crate::dsp::{GwpeOptions, SolverKind};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// DEREVERB PRESETS
// =============================================================================

/// Name of the preset the command-line tool uses when none is given.
pub const DEFAULT_PRESET: &str = "Default";

/// Partial option set. Fields left out keep the value they override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetValues {
    #[serde(default)]
    pub description: String,
    pub num_iter: Option<usize>,
    pub delta: Option<usize>,
    pub filter_len: Option<usize>,
    pub lower_freq_hz: Option<f32>,
    pub psd_context: Option<usize>,
    pub solver: Option<SolverKind>,
}

impl PresetValues {
    pub fn apply(&self, opts: &mut GwpeOptions) {
        if let Some(v) = self.num_iter {
            opts.num_iter = v;
        }
        if let Some(v) = self.delta {
            opts.delta = v;
        }
        if let Some(v) = self.filter_len {
            opts.filter_len = v;
        }
        if let Some(v) = self.lower_freq_hz {
            opts.lower_freq_hz = v;
        }
        if let Some(v) = self.psd_context {
            opts.psd_context = v;
        }
        if let Some(v) = self.solver {
            opts.solver = v;
        }
    }
}

#[derive(Debug)]
pub struct PresetManager {
    presets: BTreeMap<String, PresetValues>,
}

impl PresetManager {
    /// Load presets from baked-in JSON. This is fallible but non-fatal.
    /// Returns a manager holding only the "Default" preset if parsing fails.
    pub fn new() -> Self {
        let presets_str = include_str!("../presets.json");
        Self::from_json(presets_str).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let presets = serde_json::from_str::<BTreeMap<String, PresetValues>>(json)
            .context("malformed preset JSON")?;
        Ok(Self { presets })
    }

    pub fn get_preset_values(&self, preset_name: &str) -> Option<&PresetValues> {
        self.presets.get(preset_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// Applies the named preset to `opts`. Unknown names are an error.
    pub fn apply(&self, preset_name: &str, opts: &mut GwpeOptions) -> Result<()> {
        let values = self.get_preset_values(preset_name).with_context(|| {
            let known: Vec<&str> = self.names().collect();
            format!("unknown preset '{preset_name}' (known: {})", known.join(", "))
        })?;
        values.apply(opts);
        Ok(())
    }
}

impl Default for PresetManager {
    fn default() -> Self {
        let mut presets = BTreeMap::new();
        presets.insert(
            DEFAULT_PRESET.to_string(),
            PresetValues {
                description: "Three iterations, 16 taps after a 3 frame delay".to_string(),
                num_iter: Some(3),
                delta: Some(3),
                filter_len: Some(16),
                lower_freq_hz: Some(50.0),
                ..Default::default()
            },
        );
        Self { presets }
    }
}

// =============================================================================
// JSON OVERRIDES
// =============================================================================

/// Overlays the fields present in a JSON object onto `base`.
///
/// Unlike deserializing straight into [`GwpeOptions`], fields missing from
/// `json` keep their value in `base` rather than the library default.
pub fn overlay_json(base: &GwpeOptions, json: &str) -> Result<GwpeOptions> {
    let overrides: Value = serde_json::from_str(json).context("config is not valid JSON")?;
    let Value::Object(overrides) = overrides else {
        anyhow::bail!("config must be a JSON object");
    };
    let mut merged = serde_json::to_value(base)?;
    if let Value::Object(fields) = &mut merged {
        for (key, value) in overrides {
            if !fields.contains_key(&key) {
                anyhow::bail!("unknown option '{key}' in config");
            }
            fields.insert(key, value);
        }
    }
    serde_json::from_value(merged).context("config has a field of the wrong type")
}
