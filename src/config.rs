//! Effect configuration loaded from JSON.
//!
//! Every field has a default so a partial file (or none at all) is valid.
//! Out-of-range values are clamped by `sanitize` rather than rejected.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::post_processing::{ColorGrade, PostOptions};

/// Default particle cap.
pub const DEFAULT_MAX_PARTICLES: usize = 500;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    /// Seed for the shared deterministic RNG.
    pub seed: u64,
    pub particles: ParticleSettings,
    pub lighting: LightingSettings,
    pub bloom: BloomSettings,
    /// Default post-process options applied each frame.
    pub post: PostOptions,
    /// Extra or overriding color-grade presets.
    pub color_grades: HashMap<String, ColorGrade>,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            seed: 0x00C0_FFEE,
            particles: ParticleSettings::default(),
            lighting: LightingSettings::default(),
            bloom: BloomSettings::default(),
            post: PostOptions::default(),
            color_grades: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSettings {
    /// Live particle cap; the oldest surplus is dropped each tick.
    pub max_particles: usize,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            max_particles: DEFAULT_MAX_PARTICLES,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    /// 0 = fully dark outside lights, 1 = no darkening.
    pub ambient: f32,
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self { ambient: 0.3 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    /// Whether to attempt creating the accelerated backend.
    pub enabled: bool,
    pub intensity: f32,
    pub threshold: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: 0.6,
            threshold: 0.7,
        }
    }
}

impl FxConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FxConfig =
            serde_json::from_str(json).context("Failed to parse effect config JSON")?;
        Ok(config.sanitize())
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&contents)
    }

    /// Clamp parameters to safe ranges.
    pub fn sanitize(mut self) -> Self {
        self.particles.max_particles = self.particles.max_particles.max(1);
        self.lighting.ambient = self.lighting.ambient.clamp(0.0, 1.0);
        self.bloom.intensity = self.bloom.intensity.max(0.0);
        self.bloom.threshold = self.bloom.threshold.clamp(0.0, 1.0);
        self.post = self.post.sanitize();
        self
    }
}
