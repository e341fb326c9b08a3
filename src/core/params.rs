//! Generation request parameters and produced artifacts.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::DispatchError;

/// Seed value meaning "pick one at random".
pub const RANDOM_SEED: i64 = -1;

/// Parameters for one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Positive prompt.
    pub prompt: String,
    /// Negative prompt.
    pub negative_prompt: String,
    /// Base seed; `-1` picks a random one.
    pub seed: i64,
    /// Variation seed; `-1` picks a random one.
    pub var_seed: i64,
    /// Sampling steps.
    pub steps: u32,
    /// Classifier-free guidance scale.
    pub cfg_scale: f64,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Model to generate with; `None` accepts whatever a backend has loaded.
    pub model: Option<String>,
    /// Restrict to backends of this type tag.
    pub backend_type: Option<String>,
    /// Backend-specific extras.
    pub other: BTreeMap<String, serde_json::Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            seed: RANDOM_SEED,
            var_seed: RANDOM_SEED,
            steps: 20,
            cfg_scale: 7.0,
            width: 512,
            height: 512,
            model: None,
            backend_type: None,
            other: BTreeMap::new(),
        }
    }
}

/// Normalise a parameter name: lowercase, alphanumerics only.
#[must_use]
pub fn clean_param_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn parse_value<T: std::str::FromStr>(param: &str, value: &str) -> Result<T, DispatchError> {
    value
        .trim()
        .parse()
        .map_err(|_| DispatchError::InvalidData(format!("invalid value `{value}` for `{param}`")))
}

impl GenerationParams {
    /// Replace random-seed markers with concrete seeds.
    pub fn resolve_seeds(&mut self) {
        let mut rng = rand::rng();
        if self.seed == RANDOM_SEED {
            self.seed = i64::from(rng.random_range(0..i32::MAX));
        }
        if self.var_seed == RANDOM_SEED {
            self.var_seed = i64::from(rng.random_range(0..i32::MAX));
        }
    }

    /// Parameters for the `index`th item of a batch.
    #[must_use]
    pub fn for_batch_index(&self, index: usize) -> Self {
        let mut params = self.clone();
        params.seed = self
            .seed
            .saturating_add(i64::try_from(index).unwrap_or(i64::MAX));
        params
    }

    /// Set one parameter from its textual form.
    ///
    /// Unknown names are stored in [`Self::other`] as strings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the value does not parse for a typed field.
    pub fn apply(&mut self, param: &str, value: &str) -> Result<(), DispatchError> {
        match clean_param_name(param).as_str() {
            "prompt" => self.prompt = value.to_string(),
            "negativeprompt" => self.negative_prompt = value.to_string(),
            "seed" => self.seed = parse_value(param, value)?,
            "varseed" | "variationseed" => self.var_seed = parse_value(param, value)?,
            "steps" => self.steps = parse_value(param, value)?,
            "cfgscale" => self.cfg_scale = parse_value(param, value)?,
            "width" => self.width = parse_value(param, value)?,
            "height" => self.height = parse_value(param, value)?,
            "model" => self.model = Some(value.trim().to_string()),
            "backendtype" => self.backend_type = Some(value.trim().to_string()),
            _ => {
                self.other
                    .insert(param.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
        Ok(())
    }

    /// Replace `find` with `replace` in every prompt-like field.
    pub fn replace_in_prompts(&mut self, find: &str, replace: &str) {
        self.prompt = self.prompt.replace(find, replace);
        self.negative_prompt = self.negative_prompt.replace(find, replace);
        for (key, value) in &mut self.other {
            if !key.ends_with("_prompt") {
                continue;
            }
            if let serde_json::Value::String(text) = value {
                *text = text.replace(find, replace);
            }
        }
    }
}

/// One produced output, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Encoded bytes.
    pub data: Vec<u8>,
    /// File extension for the encoding, e.g. `png`.
    pub format: String,
}

impl Artifact {
    /// Create an artifact.
    pub fn new(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            data,
            format: format.into(),
        }
    }
}
