//! Coarse burst magnitude shared by the particle and volumetric engines.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    #[default]
    Medium,
    Large,
    Huge,
}

impl SizeClass {
    pub const ALL: [SizeClass; 4] = [
        SizeClass::Small,
        SizeClass::Medium,
        SizeClass::Large,
        SizeClass::Huge,
    ];

    /// Parse from string (for trigger calls). Unknown names map to `Medium`.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "small" => SizeClass::Small,
            "large" => SizeClass::Large,
            "huge" => SizeClass::Huge,
            "medium" => SizeClass::Medium,
            other => {
                log::debug!("Unknown size class '{}', using medium", other);
                SizeClass::Medium
            }
        }
    }

    /// Particles emitted by an explosion of this size.
    pub fn particle_count(self) -> usize {
        match self {
            SizeClass::Small => 10,
            SizeClass::Medium => 25,
            SizeClass::Large => 50,
            SizeClass::Huge => 100,
        }
    }

    /// Screen-shake intensity requested by an explosion of this size.
    pub fn shake_intensity(self) -> f32 {
        match self {
            SizeClass::Small => 2.0,
            SizeClass::Medium => 5.0,
            SizeClass::Large => 10.0,
            SizeClass::Huge => 15.0,
        }
    }

    /// `(max_radius, duration_ticks)` of a volumetric explosion.
    pub fn volumetric_params(self) -> (f32, u32) {
        match self {
            SizeClass::Small => (40.0, 20),
            SizeClass::Medium => (80.0, 30),
            SizeClass::Large => (150.0, 40),
            SizeClass::Huge => (250.0, 50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_from_str() {
        assert_eq!(SizeClass::from_str("huge"), SizeClass::Huge);
        assert_eq!(SizeClass::from_str(" Small "), SizeClass::Small);
        assert_eq!(SizeClass::from_str("gigantic"), SizeClass::Medium);
    }

    #[test]
    fn test_serde_names() {
        let s: SizeClass = serde_json::from_str("\"large\"").unwrap();
        assert_eq!(s, SizeClass::Large);
    }
}
