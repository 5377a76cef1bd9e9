//! Dynamic point lights composited over the scene.
//!
//! Rendering is two passes:
//! 1. An offscreen darkness layer (`rgba(0, 0, 20, 1 - ambient)`) receives
//!    every light as an additive radial gradient, then the whole layer is
//!    multiplied onto the surface. Everything outside a light darkens.
//! 2. Each light is drawn again at half radius and half intensity directly
//!    onto the surface, additively, as a glow core.
//!
//! ## Philosophy
//!
//! "Lighting is a depth cue, not a physical simulation."

use glam::Vec2;

use crate::color::Color;
use crate::compositor::EffectContext;
use crate::rng::FxRng;
use crate::surface::{BlendMode, GradientStop, Surface};

/// Tint of the darkness layer.
const DARKNESS: Color = Color::rgb8(0, 0, 20);

/// Flicker modulation for a phase, always within `[0.9, 1.0]`.
pub fn flicker_factor(phase: f32) -> f32 {
    0.95 + 0.05 * phase.sin()
}

/// A point light. Lights never expire on their own.
#[derive(Clone, Debug)]
pub struct Light {
    pub pos: Vec2,
    pub color: Color,
    /// Base intensity in `0.0..=1.0`.
    pub intensity: f32,
    pub radius: f32,
    /// Monotonically increasing flicker phase.
    pub phase: f32,
    /// Phase advance per tick.
    pub flicker_speed: f32,
}

impl Light {
    /// Intensity after flicker modulation.
    pub fn rendered_intensity(&self) -> f32 {
        self.intensity * flicker_factor(self.phase)
    }

    fn gradient(&self, intensity: f32) -> [GradientStop; 3] {
        [
            GradientStop::new(0.0, self.color.with_alpha(intensity)),
            GradientStop::new(0.5, self.color.with_alpha(intensity * 0.5)),
            GradientStop::new(1.0, self.color.with_alpha(0.0)),
        ]
    }
}

/// Stable reference to a light. Stale handles are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LightHandle {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug, Default)]
struct LightSlot {
    generation: u32,
    light: Option<Light>,
}

/// Owns the light list and the offscreen darkness layer.
pub struct LightingCompositor {
    slots: Vec<LightSlot>,
    free: Vec<u32>,
    ambient: f32,
    layer: Surface,
    rng: FxRng,
}

impl LightingCompositor {
    pub fn new(ctx: &EffectContext) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            ambient: ctx.config.lighting.ambient.clamp(0.0, 1.0),
            layer: Surface::new(ctx.width, ctx.height),
            rng: FxRng::new(ctx.config.seed ^ 0x4C49_4748),
        }
    }

    /// Add a light and return its handle.
    pub fn add_light(&mut self, x: f32, y: f32, color: &str, intensity: f32, radius: f32) -> LightHandle {
        let light = Light {
            pos: Vec2::new(x, y),
            color: Color::parse_or(color, Color::WHITE),
            intensity: intensity.clamp(0.0, 1.0),
            radius: radius.max(0.0),
            phase: self.rng.range(0.0, std::f32::consts::TAU),
            flicker_speed: self.rng.range(0.05, 0.15),
        };

        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.light = Some(light);
                LightHandle { index, generation: slot.generation }
            }
            None => {
                self.slots.push(LightSlot { generation: 0, light: Some(light) });
                LightHandle {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Remove a light. Returns false for stale or unknown handles.
    pub fn remove_light(&mut self, handle: LightHandle) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.light.is_some() => {
                slot.light = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(handle.index);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, handle: LightHandle) -> Option<&Light> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.light.as_ref())
    }

    /// Move a light (e.g. to follow the ship). Returns false for stale handles.
    pub fn set_position(&mut self, handle: LightHandle, x: f32, y: f32) -> bool {
        match self.slots.get_mut(handle.index as usize) {
            Some(LightSlot { generation, light: Some(light) }) if *generation == handle.generation => {
                light.pos = Vec2::new(x, y);
                true
            }
            _ => false,
        }
    }

    pub fn lights(&self) -> impl Iterator<Item = &Light> {
        self.slots.iter().filter_map(|slot| slot.light.as_ref())
    }

    pub fn light_count(&self) -> usize {
        self.lights().count()
    }

    pub fn ambient(&self) -> f32 {
        self.ambient
    }

    /// 0 = fully dark outside lights, 1 = no darkening.
    pub fn set_ambient_light(&mut self, level: f32) {
        self.ambient = level.clamp(0.0, 1.0);
    }

    /// Advance every light's flicker phase.
    pub fn tick(&mut self) {
        for light in self.slots.iter_mut().filter_map(|slot| slot.light.as_mut()) {
            light.phase += light.flicker_speed;
        }
    }

    /// Composite the lighting onto `surface`. No-op when there are no lights.
    pub fn render(&mut self, surface: &mut Surface) {
        if self.light_count() == 0 {
            return;
        }
        self.layer.resize(surface.width(), surface.height());
        self.layer.fill(DARKNESS.with_alpha(1.0 - self.ambient));

        for light in self.slots.iter().filter_map(|slot| slot.light.as_ref()) {
            let stops = light.gradient(light.rendered_intensity());
            self.layer
                .fill_radial_gradient(light.pos.x, light.pos.y, light.radius, &stops, BlendMode::Additive);
        }
        surface.composite(&self.layer, BlendMode::Multiply, 1.0);

        for light in self.lights() {
            let stops = light.gradient(light.rendered_intensity() * 0.5);
            surface.fill_radial_gradient(light.pos.x, light.pos.y, light.radius * 0.5, &stops, BlendMode::Additive);
        }
    }

    /// Resize the offscreen layer.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.layer.resize(width, height);
    }

    /// Remove every light. Outstanding handles become stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.light.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
    }
}
