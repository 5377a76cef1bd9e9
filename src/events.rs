//! Trigger events and frame-indexed timelines.
//!
//! Every inbound trigger call has an `FxEvent` variant so a sequence of game
//! events can be recorded, loaded from JSON and replayed headless:
//!
//! ```json
//! [
//!   { "frame": 0,  "event": { "kind": "add_light", "x": 320, "y": 300, "color": "#00ccff", "intensity": 0.8, "radius": 120 } },
//!   { "frame": 10, "event": { "kind": "explosion", "x": 200, "y": 150, "size": "huge", "color": "#ff6600" } }
//! ]
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::compositor::FrameCompositor;
use crate::particle::DEFAULT_SHAKE_DURATION;
use crate::size_class::SizeClass;

fn default_color() -> String {
    "#ff6600".to_string()
}

fn default_intensity() -> f32 {
    1.0
}

fn default_shake_duration() -> u32 {
    DEFAULT_SHAKE_DURATION
}

/// A fire-and-forget effect trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FxEvent {
    Explosion {
        x: f32,
        y: f32,
        #[serde(default)]
        size: SizeClass,
        #[serde(default = "default_color")]
        color: String,
    },
    Trail {
        x: f32,
        y: f32,
        #[serde(default = "default_color")]
        color: String,
        #[serde(default = "default_intensity")]
        intensity: f32,
    },
    BulletTrail {
        x: f32,
        y: f32,
        vx: f32,
        vy: f32,
        #[serde(default = "default_color")]
        color: String,
    },
    CollectBurst {
        x: f32,
        y: f32,
        #[serde(default = "default_color")]
        color: String,
    },
    HitSpark {
        x: f32,
        y: f32,
        #[serde(default)]
        angle: f32,
        #[serde(default = "default_color")]
        color: String,
    },
    LevelUp {
        x: f32,
        y: f32,
    },
    ShieldHit {
        x: f32,
        y: f32,
        radius: f32,
        #[serde(default = "default_color")]
        color: String,
    },
    WarpBurst {
        x: f32,
        y: f32,
        #[serde(default = "default_color")]
        color: String,
    },
    Shake {
        intensity: f32,
        #[serde(default = "default_shake_duration")]
        duration: u32,
    },
    AddLight {
        x: f32,
        y: f32,
        #[serde(default = "default_color")]
        color: String,
        #[serde(default = "default_intensity")]
        intensity: f32,
        radius: f32,
    },
    ClearLights,
    Ambient {
        level: f32,
    },
    Clear,
}

impl FxEvent {
    /// Dispatch to the owning engine.
    pub fn apply(&self, fx: &mut FrameCompositor) {
        match self {
            FxEvent::Explosion { x, y, size, color } => fx.spawn_explosion(*x, *y, *size, color),
            FxEvent::Trail { x, y, color, intensity } => {
                fx.particles_mut().spawn_trail(*x, *y, color, *intensity)
            }
            FxEvent::BulletTrail { x, y, vx, vy, color } => {
                fx.particles_mut().spawn_bullet_trail(*x, *y, *vx, *vy, color)
            }
            FxEvent::CollectBurst { x, y, color } => {
                fx.particles_mut().spawn_collect_burst(*x, *y, color)
            }
            FxEvent::HitSpark { x, y, angle, color } => {
                fx.particles_mut().spawn_hit_spark(*x, *y, *angle, color)
            }
            FxEvent::LevelUp { x, y } => fx.particles_mut().spawn_level_up_burst(*x, *y),
            FxEvent::ShieldHit { x, y, radius, color } => {
                fx.particles_mut().spawn_shield_hit(*x, *y, *radius, color)
            }
            FxEvent::WarpBurst { x, y, color } => fx.particles_mut().spawn_warp_burst(*x, *y, color),
            FxEvent::Shake { intensity, duration } => {
                fx.particles_mut().request_shake(*intensity, *duration)
            }
            FxEvent::AddLight { x, y, color, intensity, radius } => {
                fx.lighting_mut().add_light(*x, *y, color, *intensity, *radius);
            }
            FxEvent::ClearLights => fx.lighting_mut().clear(),
            FxEvent::Ambient { level } => fx.lighting_mut().set_ambient_light(*level),
            FxEvent::Clear => fx.clear(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub frame: u64,
    pub event: FxEvent,
}

/// Events keyed by the frame they fire on, kept sorted by frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FxTimeline {
    entries: Vec<TimelineEntry>,
}

impl FxTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of `{frame, event}` entries.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut timeline: FxTimeline =
            serde_json::from_str(json).context("Failed to parse timeline JSON")?;
        timeline.entries.sort_by_key(|e| e.frame);
        Ok(timeline)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read timeline file {}", path.display()))?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize timeline")
    }

    /// Insert an event, keeping entries on the same frame in insertion order.
    pub fn push(&mut self, frame: u64, event: FxEvent) {
        let at = self.entries.partition_point(|e| e.frame <= frame);
        self.entries.insert(at, TimelineEntry { frame, event });
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frame of the final event.
    pub fn last_frame(&self) -> Option<u64> {
        self.entries.last().map(|e| e.frame)
    }

    /// Events due on `frame`, in insertion order.
    pub fn events_at(&self, frame: u64) -> impl Iterator<Item = &FxEvent> {
        let start = self.entries.partition_point(|e| e.frame < frame);
        self.entries[start..]
            .iter()
            .take_while(move |e| e.frame == frame)
            .map(|e| &e.event)
    }

    /// A short showcase sequence scaled to the frame size.
    pub fn demo(width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let ship = (w * 0.5, h * 0.85);
        let mut timeline = Self::new();

        timeline.push(0, FxEvent::Ambient { level: 0.45 });
        timeline.push(
            0,
            FxEvent::AddLight {
                x: ship.0,
                y: ship.1,
                color: "#00ccff".into(),
                intensity: 0.8,
                radius: h * 0.35,
            },
        );
        timeline.push(
            0,
            FxEvent::AddLight {
                x: w * 0.2,
                y: h * 0.2,
                color: "#ff9900".into(),
                intensity: 0.6,
                radius: h * 0.3,
            },
        );
        for frame in (2..120).step_by(6) {
            timeline.push(
                frame,
                FxEvent::BulletTrail {
                    x: ship.0,
                    y: ship.1 - (frame % 30) as f32 * 8.0,
                    vx: 0.0,
                    vy: -10.0,
                    color: "#ffff66".into(),
                },
            );
        }
        for frame in (0..120).step_by(2) {
            timeline.push(
                frame,
                FxEvent::Trail {
                    x: ship.0,
                    y: ship.1 + 12.0,
                    color: "#ff9900".into(),
                    intensity: 1.0,
                },
            );
        }
        timeline.push(
            10,
            FxEvent::Explosion {
                x: w * 0.3,
                y: h * 0.3,
                size: SizeClass::Medium,
                color: "#ff6600".into(),
            },
        );
        timeline.push(
            20,
            FxEvent::HitSpark {
                x: w * 0.6,
                y: h * 0.35,
                angle: -std::f32::consts::FRAC_PI_2,
                color: "#ffffff".into(),
            },
        );
        timeline.push(
            30,
            FxEvent::Explosion {
                x: w * 0.65,
                y: h * 0.4,
                size: SizeClass::Huge,
                color: "#00ffff".into(),
            },
        );
        timeline.push(
            45,
            FxEvent::CollectBurst {
                x: w * 0.4,
                y: h * 0.6,
                color: "#ffd700".into(),
            },
        );
        timeline.push(
            60,
            FxEvent::ShieldHit {
                x: ship.0,
                y: ship.1,
                radius: 24.0,
                color: "#00ccff".into(),
            },
        );
        timeline.push(
            75,
            FxEvent::WarpBurst {
                x: w * 0.8,
                y: h * 0.25,
                color: "#9966ff".into(),
            },
        );
        timeline.push(90, FxEvent::LevelUp { x: w * 0.5, y: h * 0.45 });
        timeline.push(
            100,
            FxEvent::Explosion {
                x: w * 0.25,
                y: h * 0.5,
                size: SizeClass::Large,
                color: "#ff00ff".into(),
            },
        );
        timeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::EffectContext;
    use crate::gpu::bloom_processor::BloomExtractor;

    fn compositor() -> FrameCompositor {
        FrameCompositor::with_bloom(EffectContext::new(320, 240), BloomExtractor::disabled())
    }

    #[test]
    fn test_parse_timeline_with_defaults() {
        let json = r#"[
            { "frame": 5, "event": { "kind": "shake", "intensity": 4 } },
            { "frame": 0, "event": { "kind": "explosion", "x": 10, "y": 20 } },
            { "frame": 5, "event": { "kind": "clear_lights" } }
        ]"#;
        let timeline = FxTimeline::from_json_str(json).unwrap();
        assert_eq!(timeline.len(), 3);
        assert_eq!(
            timeline.events_at(0).next(),
            Some(&FxEvent::Explosion {
                x: 10.0,
                y: 20.0,
                size: SizeClass::Medium,
                color: "#ff6600".into(),
            })
        );
        let at_five: Vec<_> = timeline.events_at(5).collect();
        assert_eq!(
            at_five,
            vec![
                &FxEvent::Shake { intensity: 4.0, duration: DEFAULT_SHAKE_DURATION },
                &FxEvent::ClearLights,
            ]
        );
        assert_eq!(timeline.events_at(3).count(), 0);
        assert_eq!(timeline.last_frame(), Some(5));
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let json = r#"[{ "frame": 0, "event": { "kind": "nuke", "x": 0, "y": 0 } }]"#;
        assert!(FxTimeline::from_json_str(json).is_err());
    }

    #[test]
    fn test_events_dispatch_to_engines() {
        let mut fx = compositor();
        FxEvent::Explosion {
            x: 100.0,
            y: 100.0,
            size: SizeClass::Small,
            color: "#ff6600".into(),
        }
        .apply(&mut fx);
        FxEvent::AddLight {
            x: 0.0,
            y: 0.0,
            color: "#ffffff".into(),
            intensity: 1.0,
            radius: 10.0,
        }
        .apply(&mut fx);
        FxEvent::Ambient { level: 0.9 }.apply(&mut fx);
        assert_eq!(fx.particles().len(), 10);
        assert_eq!(fx.volumetric().len(), 1);
        assert_eq!(fx.lighting().light_count(), 1);
        assert!((fx.lighting().ambient() - 0.9).abs() < 1e-6);

        FxEvent::Clear.apply(&mut fx);
        assert!(fx.particles().is_empty());
        assert!(fx.volumetric().is_empty());
        assert_eq!(fx.lighting().light_count(), 0);
    }

    #[test]
    fn test_demo_timeline_replays() {
        let timeline = FxTimeline::demo(320, 240);
        let json = timeline.to_json_string().unwrap();
        assert_eq!(FxTimeline::from_json_str(&json).unwrap(), timeline);

        let mut fx = compositor();
        for frame in 0..=timeline.last_frame().unwrap() {
            for event in timeline.events_at(frame) {
                event.apply(&mut fx);
            }
            fx.tick();
            assert!(fx.particles().len() <= fx.particles().max_particles());
        }
        assert_eq!(fx.lighting().light_count(), 2);
    }
}
