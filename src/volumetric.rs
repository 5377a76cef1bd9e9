//! Layered fireballs, fog and a depth-of-field row blur.
//!
//! "Volumetric" here means concentric additive radial gradients that fake
//! depth on a flat surface; nothing is ray-marched.

use std::f32::consts::PI;

use glam::Vec2;

use crate::color::Color;
use crate::compositor::EffectContext;
use crate::size_class::SizeClass;
use crate::surface::{BlendMode, GradientStop, Surface};

/// Concentric rings drawn per explosion.
pub const LAYER_COUNT: usize = 5;
/// Peak per-ring alpha.
const LAYER_ALPHA: f32 = 0.4;
/// Fraction of the frame height around the focus line left sharp.
const FOCUS_BAND: f32 = 0.1;

/// A self-expiring layered fireball.
#[derive(Clone, Debug)]
pub struct VolumetricExplosion {
    pub center: Vec2,
    pub color: Color,
    pub max_radius: f32,
    /// Current radius, `max_radius * sin(progress * PI)`.
    pub radius: f32,
    /// Remaining ticks.
    pub life: u32,
    pub duration: u32,
}

impl VolumetricExplosion {
    pub fn new(center: Vec2, size: SizeClass, color: Color) -> Self {
        let (max_radius, duration) = size.volumetric_params();
        Self {
            center,
            color,
            max_radius,
            radius: 0.0,
            life: duration,
            duration,
        }
    }

    /// Elapsed fraction of the lifetime, `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        1.0 - self.life as f32 / self.duration.max(1) as f32
    }

    /// Overall opacity, fading with remaining life.
    pub fn alpha(&self) -> f32 {
        self.life as f32 / self.duration.max(1) as f32
    }

    pub fn is_alive(&self) -> bool {
        self.life > 0
    }

    pub fn update(&mut self) {
        self.life = self.life.saturating_sub(1);
        self.radius = self.max_radius * (self.progress() * PI).sin();
    }

    fn draw(&self, surface: &mut Surface) {
        let global = self.alpha();
        for i in 0..LAYER_COUNT {
            let falloff = 1.0 - i as f32 / LAYER_COUNT as f32;
            let radius = self.radius * falloff;
            let alpha = global * falloff * LAYER_ALPHA;
            if radius < 0.5 || alpha <= 0.0 {
                continue;
            }
            let stops = [
                GradientStop::new(0.0, self.color.with_alpha(alpha)),
                GradientStop::new(0.5, self.color.with_alpha(alpha * 0.6)),
                GradientStop::new(1.0, self.color.with_alpha(0.0)),
            ];
            surface.fill_radial_gradient(self.center.x, self.center.y, radius, &stops, BlendMode::Additive);
        }
    }
}

/// Owns the active volumetric explosions.
pub struct VolumetricLayer {
    explosions: Vec<VolumetricExplosion>,
}

impl VolumetricLayer {
    pub fn new(_ctx: &EffectContext) -> Self {
        Self {
            explosions: Vec::with_capacity(16),
        }
    }

    pub fn explosions(&self) -> &[VolumetricExplosion] {
        &self.explosions
    }

    pub fn len(&self) -> usize {
        self.explosions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.explosions.is_empty()
    }

    pub fn spawn(&mut self, x: f32, y: f32, size: SizeClass, color: &str) {
        let color = Color::parse_or(color, Color::FALLBACK);
        self.explosions
            .push(VolumetricExplosion::new(Vec2::new(x, y), size, color));
    }

    pub fn tick(&mut self) {
        for explosion in &mut self.explosions {
            explosion.update();
        }
        self.explosions.retain(VolumetricExplosion::is_alive);
    }

    pub fn draw(&self, surface: &mut Surface) {
        for explosion in &self.explosions {
            explosion.draw(surface);
        }
    }

    pub fn clear(&mut self) {
        self.explosions.clear();
    }
}

/// Vertical fog: transparent at the top, `color` at `density` opacity at the bottom.
pub fn create_fog(surface: &mut Surface, density: f32, color: &str) {
    let density = density.clamp(0.0, 1.0);
    if density <= 0.0 {
        return;
    }
    let color = Color::parse_or(color, Color::rgb8(40, 40, 80));
    let height = surface.height().max(1) as f32;
    let width = surface.width() as f32;
    for y in 0..surface.height() {
        let t = (y as f32 + 0.5) / height;
        surface.fill_rect(0.0, y as f32, width, 1.0, color.with_alpha(density * t), BlendMode::SourceOver);
    }
}

/// Blur radius for a row, 0 inside the focus band.
pub fn row_blur_radius(y: u32, height: u32, focus_y: f32, blur_radius: u32) -> u32 {
    let height = height.max(1) as f32;
    let distance = (y as f32 + 0.5 - focus_y).abs() / height;
    if distance < FOCUS_BAND {
        return 0;
    }
    ((distance * blur_radius as f32 * 2.0).round() as u32).min(blur_radius)
}

/// Naive horizontal box blur whose radius grows with distance from `focus_y`.
///
/// Cost is proportional to width × radius per row, so only call this while a
/// depth-of-field cue is wanted.
pub fn apply_depth_of_field(surface: &mut Surface, focus_y: f32, blur_radius: u32) {
    if blur_radius == 0 {
        return;
    }
    let (width, height) = (surface.width() as usize, surface.height());
    let stride = width * 4;
    let mut row_copy = vec![0u8; stride];

    for y in 0..height {
        let radius = row_blur_radius(y, height, focus_y, blur_radius) as usize;
        if radius == 0 {
            continue;
        }
        let start = y as usize * stride;
        let row = &mut surface.pixels_mut()[start..start + stride];
        row_copy.copy_from_slice(row);

        for x in 0..width {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(width - 1);
            let mut sum = [0u32; 4];
            for sx in lo..=hi {
                for c in 0..4 {
                    sum[c] += row_copy[sx * 4 + c] as u32;
                }
            }
            let n = (hi - lo + 1) as u32;
            for c in 0..4 {
                row[x * 4 + c] = (sum[c] / n) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> VolumetricLayer {
        VolumetricLayer::new(&EffectContext::new(320, 240))
    }

    #[test]
    fn test_huge_peaks_at_midpoint() {
        let mut layer = layer();
        layer.spawn(160.0, 120.0, SizeClass::Huge, "#ff6600");
        for _ in 0..25 {
            layer.tick();
        }
        let e = &layer.explosions()[0];
        assert!((e.progress() - 0.5).abs() < 1e-6);
        assert!((e.radius - 250.0).abs() < 1e-3);

        let mut max_seen: f32 = 0.0;
        while !layer.is_empty() {
            max_seen = max_seen.max(layer.explosions()[0].radius);
            layer.tick();
        }
        assert!(max_seen <= 250.0 + 1e-3);
    }

    #[test]
    fn test_expires_after_duration() {
        for size in SizeClass::ALL {
            let mut layer = layer();
            layer.spawn(0.0, 0.0, size, "#ffffff");
            let (_, duration) = size.volumetric_params();
            for _ in 0..duration - 1 {
                layer.tick();
            }
            assert_eq!(layer.len(), 1);
            layer.tick();
            assert!(layer.is_empty());
        }
    }

    #[test]
    fn test_draw_brightens_center() {
        let mut layer = layer();
        layer.spawn(50.0, 50.0, SizeClass::Small, "#ff6600");
        for _ in 0..10 {
            layer.tick();
        }
        let mut surface = Surface::new(100, 100);
        surface.fill(Color::BLACK);
        layer.draw(&mut surface);
        assert!(surface.get_pixel(50, 50).unwrap()[0] > 0);
        assert_eq!(surface.get_pixel(0, 0), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_clear_then_draw_is_noop() {
        let mut layer = layer();
        layer.spawn(50.0, 50.0, SizeClass::Large, "#ff6600");
        layer.tick();
        layer.clear();
        let mut surface = Surface::new(100, 100);
        layer.draw(&mut surface);
        assert!(surface.is_uniform([0, 0, 0, 0]));
    }

    #[test]
    fn test_fog_thickens_downward() {
        let mut surface = Surface::new(10, 100);
        surface.fill(Color::BLACK);
        create_fog(&mut surface, 0.8, "#8080ff");
        let top = surface.get_pixel(5, 0).unwrap()[2];
        let bottom = surface.get_pixel(5, 99).unwrap()[2];
        assert!(bottom > top);
    }

    #[test]
    fn test_depth_of_field_leaves_focus_band_sharp() {
        let mut surface = Surface::new(20, 100);
        for y in 0..100 {
            for x in 0..20 {
                let v = if x % 2 == 0 { 255 } else { 0 };
                surface.set_pixel(x, y, [v, v, v, 255]);
            }
        }
        apply_depth_of_field(&mut surface, 50.0, 4);

        // Row at the focus line is untouched
        assert_eq!(surface.get_pixel(0, 50), Some([255, 255, 255, 255]));
        assert_eq!(surface.get_pixel(1, 50), Some([0, 0, 0, 255]));
        // Far rows are smoothed
        let far = surface.get_pixel(10, 0).unwrap()[0];
        assert!(far > 0 && far < 255);
    }

    #[test]
    fn test_row_blur_radius_is_capped() {
        assert_eq!(row_blur_radius(50, 100, 50.0, 8), 0);
        assert_eq!(row_blur_radius(0, 100, 99.0, 8), 8);
        let mid = row_blur_radius(75, 100, 50.0, 8);
        assert!(mid > 0 && mid <= 8);
    }
}
