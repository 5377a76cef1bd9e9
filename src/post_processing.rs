//! Full-frame post-processing passes.
//!
//! `PostProcessStack::apply_all` runs the per-frame chain in a fixed order,
//! each pass reading the output of the previous one:
//!
//! 1. motion blur (additive blend of up to 3 captured frames)
//! 2. color grade (named preset)
//! 3. light rays
//! 4. lens flare
//! 5. vignette
//! 6. capture the finished frame for the next call's motion blur
//!
//! Chromatic aberration, scan lines and ambient occlusion are standalone
//! primitives. The first and last touch every pixel and are not part of the
//! default chain.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::color::{luminance, Color};
use crate::compositor::EffectContext;
use crate::surface::{sample_gradient, BlendMode, GradientStop, Surface};

/// Frames kept for motion blur; the oldest is dropped first.
pub const MOTION_BLUR_HISTORY: usize = 3;
/// Rays drawn by `light_rays` unless a count is given.
pub const DEFAULT_RAY_COUNT: u32 = 12;
/// Vignette opacity at the frame border for intensity 1.
const VIGNETTE_EDGE_ALPHA: f32 = 0.4;
/// Peak additive weight of the most recent motion-blur frame.
const MOTION_BLUR_WEIGHT: f32 = 0.3;
const SCAN_LINE_ALPHA: f32 = 0.3;
const FLARE_RADIUS: f32 = 60.0;
/// `(x offset, radius scale, alpha scale)` of the secondary flares.
const SECONDARY_FLARES: [(f32, f32, f32); 3] = [(80.0, 0.35, 0.5), (140.0, 0.2, 0.4), (220.0, 0.5, 0.25)];
const AO_RADIUS: i32 = 2;
const AO_MAX_DARKEN: f32 = 0.5;

/// Per-channel multipliers plus a contrast factor around the 0.5 midpoint.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorGrade {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub contrast: f32,
}

impl ColorGrade {
    pub const IDENTITY: ColorGrade = ColorGrade::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, contrast: f32) -> Self {
        Self { r, g, b, contrast }
    }

    #[inline]
    fn channel(value: u8, mult: f32, contrast: f32) -> u8 {
        let v = value as f32 / 255.0 * mult;
        let v = (v - 0.5) * contrast + 0.5;
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    }

    /// Grade one RGBA8 pixel in place. Alpha is untouched.
    pub fn apply(&self, px: &mut [u8]) {
        px[0] = Self::channel(px[0], self.r, self.contrast);
        px[1] = Self::channel(px[1], self.g, self.contrast);
        px[2] = Self::channel(px[2], self.b, self.contrast);
    }
}

/// Built-in stylistic presets.
pub fn builtin_color_grades() -> HashMap<String, ColorGrade> {
    [
        ("space", ColorGrade::new(0.9, 0.95, 1.15, 1.1)),
        ("warm", ColorGrade::new(1.15, 1.0, 0.85, 1.05)),
        ("dramatic", ColorGrade::new(1.1, 0.95, 0.9, 1.3)),
        ("neon", ColorGrade::new(1.1, 0.9, 1.2, 1.2)),
    ]
    .into_iter()
    .map(|(name, grade)| (name.to_string(), grade))
    .collect()
}

/// Source of the light-ray pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightRays {
    pub x: f32,
    pub y: f32,
    pub intensity: f32,
}

/// Position and tint of the lens-flare pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LensFlare {
    pub x: f32,
    pub y: f32,
    pub color: String,
    pub intensity: f32,
}

/// Options for one `apply_all` call. Zero intensities and `None` skip a pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostOptions {
    pub motion_blur: f32,
    pub color_grade: Option<String>,
    pub light_rays: Option<LightRays>,
    pub lens_flare: Option<LensFlare>,
    pub vignette: f32,
    pub ray_count: u32,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self {
            motion_blur: 0.0,
            color_grade: None,
            light_rays: None,
            lens_flare: None,
            vignette: 0.0,
            ray_count: DEFAULT_RAY_COUNT,
        }
    }
}

impl PostOptions {
    /// Clamp intensities to `0.0..=1.0` and the ray count to at least one.
    pub fn sanitize(mut self) -> Self {
        self.motion_blur = self.motion_blur.clamp(0.0, 1.0);
        self.vignette = self.vignette.clamp(0.0, 1.0);
        self.ray_count = self.ray_count.max(1);
        if let Some(rays) = self.light_rays.as_mut() {
            rays.intensity = rays.intensity.clamp(0.0, 1.0);
        }
        if let Some(flare) = self.lens_flare.as_mut() {
            flare.intensity = flare.intensity.clamp(0.0, 1.0);
        }
        self
    }
}

/// Post-process chain plus the motion-blur frame history.
pub struct PostProcessStack {
    grades: HashMap<String, ColorGrade>,
    history: VecDeque<Vec<u8>>,
    history_size: (u32, u32),
}

impl PostProcessStack {
    /// Built-in presets merged with (and overridden by) the configured ones.
    pub fn new(ctx: &EffectContext) -> Self {
        let mut grades = builtin_color_grades();
        grades.extend(
            ctx.config
                .color_grades
                .iter()
                .map(|(name, grade)| (name.clone(), *grade)),
        );
        Self {
            grades,
            history: VecDeque::with_capacity(MOTION_BLUR_HISTORY + 1),
            history_size: (ctx.width, ctx.height),
        }
    }

    pub fn register_grade(&mut self, name: impl Into<String>, grade: ColorGrade) {
        self.grades.insert(name.into(), grade);
    }

    pub fn grade(&self, name: &str) -> Option<&ColorGrade> {
        self.grades.get(name)
    }

    pub fn grade_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.grades.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Most recently captured frame.
    pub fn last_frame(&self) -> Option<&[u8]> {
        self.history.back().map(Vec::as_slice)
    }

    /// Run the fixed per-frame chain, then capture the result.
    pub fn apply_all(&mut self, surface: &mut Surface, options: &PostOptions) {
        if options.motion_blur > 0.0 {
            self.motion_blur(surface, options.motion_blur);
        }
        if let Some(name) = options.color_grade.as_deref() {
            self.color_grade(surface, name);
        }
        if let Some(rays) = options.light_rays {
            light_rays_with_count(surface, rays.x, rays.y, rays.intensity, options.ray_count);
        }
        if let Some(flare) = options.lens_flare.as_ref() {
            lens_flare(surface, flare.x, flare.y, &flare.color, flare.intensity);
        }
        if options.vignette > 0.0 {
            vignette(surface, options.vignette);
        }
        self.capture_frame(surface);
    }

    /// Additively blend the captured frames, most recent weighted highest.
    pub fn motion_blur(&self, surface: &mut Surface, intensity: f32) {
        if intensity <= 0.0 || self.history_size != (surface.width(), surface.height()) {
            return;
        }
        let n = self.history.len() as f32;
        for (i, frame) in self.history.iter().enumerate() {
            let weight = intensity * MOTION_BLUR_WEIGHT * (i as f32 + 1.0) / n;
            surface.composite_pixels(frame, BlendMode::Additive, weight);
        }
    }

    /// Apply a named preset. Returns false (and leaves the surface alone)
    /// for unknown names.
    pub fn color_grade(&self, surface: &mut Surface, name: &str) -> bool {
        let Some(grade) = self.grades.get(name) else {
            log::debug!("Unknown color grade '{}', skipping", name);
            return false;
        };
        for px in surface.pixels_mut().chunks_exact_mut(4) {
            grade.apply(px);
        }
        true
    }

    /// Store a copy of the frame, dropping the oldest beyond the cap.
    pub fn capture_frame(&mut self, surface: &Surface) {
        let size = (surface.width(), surface.height());
        if size != self.history_size {
            self.history.clear();
            self.history_size = size;
        }
        let mut frame = if self.history.len() >= MOTION_BLUR_HISTORY {
            self.history.pop_front().unwrap_or_default()
        } else {
            Vec::with_capacity(surface.pixels().len())
        };
        frame.clear();
        frame.extend_from_slice(surface.pixels());
        self.history.push_back(frame);
    }

    /// Drop the frame history.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Darken toward the border with an elliptical gradient fitted to the frame:
/// transparent inside half the way out, `0.4 * intensity` black on every
/// border pixel and beyond.
pub fn vignette(surface: &mut Surface, intensity: f32) {
    let intensity = intensity.clamp(0.0, 1.0);
    if intensity <= 0.0 {
        return;
    }
    let (w, h) = (surface.width() as i32, surface.height() as i32);
    let center = Vec2::new(w as f32, h as f32) * 0.5;
    // Border pixel centres sit at distance 1
    let reach = (center - Vec2::splat(0.5)).max(Vec2::splat(0.5));
    let stops = [
        GradientStop::new(0.0, Color::TRANSPARENT),
        GradientStop::new(0.5, Color::TRANSPARENT),
        GradientStop::new(1.0, Color::BLACK.with_alpha(VIGNETTE_EDGE_ALPHA * intensity)),
    ];
    for py in 0..h {
        for px in 0..w {
            let t = ((Vec2::new(px as f32 + 0.5, py as f32 + 0.5) - center) / reach).length();
            if t <= 0.5 {
                continue;
            }
            surface.blend_pixel(px, py, sample_gradient(&stops, t.min(1.0)), BlendMode::SourceOver);
        }
    }
}

/// Darken every other row.
pub fn scan_lines(surface: &mut Surface, intensity: f32) {
    let alpha = intensity.clamp(0.0, 1.0) * SCAN_LINE_ALPHA;
    if alpha <= 0.0 {
        return;
    }
    let width = surface.width() as f32;
    for y in (1..surface.height()).step_by(2) {
        surface.fill_rect(0.0, y as f32, width, 1.0, Color::BLACK.with_alpha(alpha), BlendMode::SourceOver);
    }
}

/// Split the red and blue channels horizontally, up to 3 px at intensity 1.
pub fn chromatic_aberration(surface: &mut Surface, intensity: f32) {
    let offset = (intensity.clamp(0.0, 1.0) * 3.0).round() as usize;
    let width = surface.width() as usize;
    if offset == 0 || width == 0 {
        return;
    }
    let source = surface.pixels().to_vec();
    for (y, row) in surface.pixels_mut().chunks_exact_mut(width * 4).enumerate() {
        let src_row = &source[y * width * 4..(y + 1) * width * 4];
        for x in 0..width {
            let red_x = (x + offset).min(width - 1);
            let blue_x = x.saturating_sub(offset);
            row[x * 4] = src_row[red_x * 4];
            row[x * 4 + 2] = src_row[blue_x * 4 + 2];
        }
    }
}

/// Radial god rays from a source point.
pub fn light_rays(surface: &mut Surface, x: f32, y: f32, intensity: f32) {
    light_rays_with_count(surface, x, y, intensity, DEFAULT_RAY_COUNT);
}

pub fn light_rays_with_count(surface: &mut Surface, x: f32, y: f32, intensity: f32, count: u32) {
    let intensity = intensity.clamp(0.0, 1.0);
    if intensity <= 0.0 || count == 0 {
        return;
    }
    let source = Vec2::new(x, y);
    let length = Vec2::new(surface.width() as f32, surface.height() as f32).length() * 0.5;
    let start = Color::WHITE.with_alpha(0.3 * intensity);
    for i in 0..count {
        let angle = i as f32 / count as f32 * TAU;
        let end = source + Vec2::from_angle(angle) * length;
        surface.draw_line_gradient(source, end, 3.0, start, start.with_alpha(0.0), BlendMode::Additive);
    }
}

/// A primary flare at `(x, y)` with three smaller ghosts along +x.
pub fn lens_flare(surface: &mut Surface, x: f32, y: f32, color: &str, intensity: f32) {
    let intensity = intensity.clamp(0.0, 1.0);
    if intensity <= 0.0 {
        return;
    }
    let color = Color::parse_or(color, Color::WHITE);
    let flare = |alpha: f32| {
        [
            GradientStop::new(0.0, color.with_alpha(alpha)),
            GradientStop::new(0.3, color.with_alpha(alpha * 0.4)),
            GradientStop::new(1.0, color.with_alpha(0.0)),
        ]
    };
    surface.fill_radial_gradient(x, y, FLARE_RADIUS, &flare(0.8 * intensity), BlendMode::Additive);
    for (dx, radius_scale, alpha_scale) in SECONDARY_FLARES {
        surface.fill_radial_gradient(
            x + dx,
            y,
            FLARE_RADIUS * radius_scale,
            &flare(0.8 * intensity * alpha_scale),
            BlendMode::Additive,
        );
    }
}

/// Darken pixels that are dimmer than their neighbourhood.
pub fn ambient_occlusion(surface: &mut Surface) {
    let (w, h) = (surface.width() as i32, surface.height() as i32);
    if w == 0 || h == 0 {
        return;
    }
    let lum: Vec<f32> = surface
        .pixels()
        .chunks_exact(4)
        .map(|px| luminance(px[0] as f32, px[1] as f32, px[2] as f32) / 255.0)
        .collect();
    let at = |x: i32, y: i32| lum[(y.clamp(0, h - 1) * w + x.clamp(0, w - 1)) as usize];

    for (i, px) in surface.pixels_mut().chunks_exact_mut(4).enumerate() {
        let (x, y) = (i as i32 % w, i as i32 / w);
        let around = (at(x - AO_RADIUS, y) + at(x + AO_RADIUS, y) + at(x, y - AO_RADIUS) + at(x, y + AO_RADIUS)) * 0.25;
        let darken = (around - lum[i]).clamp(0.0, AO_MAX_DARKEN);
        if darken > 0.0 {
            for c in &mut px[..3] {
                *c = (*c as f32 * (1.0 - darken)).round() as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FxConfig;

    fn stack() -> PostProcessStack {
        PostProcessStack::new(&EffectContext::new(32, 32))
    }

    fn gray(v: u8) -> Surface {
        let mut surface = Surface::new(32, 32);
        surface.fill(Color::rgb8(v, v, v));
        surface
    }

    #[test]
    fn test_builtin_presets() {
        let stack = stack();
        assert_eq!(stack.grade_names(), vec!["dramatic", "neon", "space", "warm"]);
        assert_eq!(stack.grade("warm"), Some(&ColorGrade::new(1.15, 1.0, 0.85, 1.05)));
    }

    #[test]
    fn test_configured_grades_override_builtins() {
        let mut config = FxConfig::default();
        config
            .color_grades
            .insert("space".into(), ColorGrade::IDENTITY);
        let stack = PostProcessStack::new(&EffectContext::with_config(32, 32, config));
        assert_eq!(stack.grade("space"), Some(&ColorGrade::IDENTITY));
    }

    #[test]
    fn test_color_grade_shifts_and_clamps() {
        let stack = stack();
        let mut surface = gray(128);
        assert!(stack.color_grade(&mut surface, "space"));
        let px = surface.get_pixel(0, 0).unwrap();
        assert!(px[2] > px[0]);
        assert_eq!(px[3], 255);

        let mut white = gray(255);
        stack.color_grade(&mut white, "warm");
        assert_eq!(white.get_pixel(3, 3).unwrap()[0], 255);
    }

    #[test]
    fn test_unknown_grade_is_noop() {
        let stack = stack();
        let mut surface = gray(90);
        let before = surface.clone();
        assert!(!stack.color_grade(&mut surface, "sepia"));
        assert_eq!(surface, before);
    }

    #[test]
    fn test_history_capped_at_three() {
        let mut stack = stack();
        for v in [10, 20, 30, 40, 50] {
            stack.capture_frame(&gray(v));
        }
        assert_eq!(stack.history_len(), MOTION_BLUR_HISTORY);
        assert_eq!(stack.last_frame().unwrap()[0], 50);
        assert_eq!(stack.history.front().unwrap()[0], 30);
    }

    #[test]
    fn test_motion_blur_adds_previous_frames() {
        let mut stack = stack();
        let mut surface = gray(0);
        stack.motion_blur(&mut surface, 1.0);
        assert!(surface.is_uniform([0, 0, 0, 255]));

        stack.capture_frame(&gray(200));
        stack.motion_blur(&mut surface, 1.0);
        assert!(surface.get_pixel(5, 5).unwrap()[0] > 0);
    }

    #[test]
    fn test_default_options_only_capture() {
        let mut stack = stack();
        let mut surface = gray(77);
        let before = surface.clone();
        stack.apply_all(&mut surface, &PostOptions::default());
        assert_eq!(surface, before);
        assert_eq!(stack.history_len(), 1);
    }

    #[test]
    fn test_apply_all_grades_after_motion_blur() {
        let mut stack = stack();
        stack.register_grade("black", ColorGrade::new(0.0, 0.0, 0.0, 1.0));
        stack.capture_frame(&gray(255));

        let mut surface = gray(0);
        let options = PostOptions {
            motion_blur: 1.0,
            color_grade: Some("black".into()),
            ..PostOptions::default()
        };
        stack.apply_all(&mut surface, &options);
        assert!(surface.is_uniform([0, 0, 0, 255]));
        assert_eq!(stack.last_frame(), Some(surface.pixels()));
    }

    #[test]
    fn test_vignette_darkens_border_only() {
        let mut surface = Surface::new(100, 100);
        surface.fill(Color::WHITE);
        vignette(&mut surface, 1.0);
        assert_eq!(surface.get_pixel(50, 50), Some([255, 255, 255, 255]));
        let corner = surface.get_pixel(0, 0).unwrap()[0];
        assert!(corner < 200 && corner > 140, "corner {corner}");
        // Mid-edge pixels get the full border darkening too
        for (x, y) in [(50, 0), (0, 50), (99, 50), (50, 99), (99, 99)] {
            assert_eq!(surface.get_pixel(x, y).unwrap()[0], corner, "({x}, {y})");
        }
    }

    #[test]
    fn test_vignette_runs_after_lens_flare() {
        let flare = LensFlare {
            x: 4.0,
            y: 4.0,
            color: "#ffffff".into(),
            intensity: 1.0,
        };
        let mut flare_only = gray(0);
        lens_flare(&mut flare_only, flare.x, flare.y, &flare.color, flare.intensity);
        let lit = flare_only.get_pixel(0, 0).unwrap()[0];
        assert!(lit > 100, "flare {lit}");

        let mut stack = stack();
        let mut surface = gray(0);
        let options = PostOptions {
            lens_flare: Some(flare),
            vignette: 1.0,
            ..PostOptions::default()
        };
        stack.apply_all(&mut surface, &options);
        let expected = (lit as f32 * (1.0 - VIGNETTE_EDGE_ALPHA)).round();
        let corner = surface.get_pixel(0, 0).unwrap()[0] as f32;
        assert!((corner - expected).abs() <= 1.0, "corner {corner} vs {expected}");
    }

    #[test]
    fn test_vignette_runs_after_light_rays() {
        let rays = LightRays {
            x: 0.5,
            y: 0.5,
            intensity: 1.0,
        };
        let mut rays_only = gray(0);
        light_rays(&mut rays_only, rays.x, rays.y, rays.intensity);
        let lit = rays_only.get_pixel(0, 0).unwrap()[0];
        assert!(lit > 0);

        let mut stack = stack();
        let mut surface = gray(0);
        let options = PostOptions {
            light_rays: Some(rays),
            vignette: 1.0,
            ..PostOptions::default()
        };
        stack.apply_all(&mut surface, &options);
        assert!(surface.get_pixel(0, 0).unwrap()[0] < lit);
    }

    #[test]
    fn test_scan_lines_darken_odd_rows() {
        let mut surface = gray(200);
        scan_lines(&mut surface, 1.0);
        assert_eq!(surface.get_pixel(0, 0).unwrap()[0], 200);
        assert!(surface.get_pixel(0, 1).unwrap()[0] < 200);
    }

    #[test]
    fn test_chromatic_aberration_splits_channels() {
        let mut surface = Surface::new(10, 1);
        surface.fill(Color::BLACK);
        surface.set_pixel(5, 0, [255, 255, 255, 255]);
        chromatic_aberration(&mut surface, 1.0);
        assert_eq!(surface.get_pixel(2, 0).unwrap()[0], 255);
        assert_eq!(surface.get_pixel(8, 0).unwrap()[2], 255);
        assert_eq!(surface.get_pixel(5, 0), Some([0, 255, 0, 255]));
    }

    #[test]
    fn test_light_rays_and_flare_brighten() {
        let mut surface = Surface::new(400, 100);
        surface.fill(Color::BLACK);
        light_rays(&mut surface, 50.0, 50.0, 1.0);
        assert!(surface.get_pixel(60, 50).unwrap()[0] > 0);

        let mut surface = Surface::new(400, 200);
        surface.fill(Color::BLACK);
        lens_flare(&mut surface, 50.0, 50.0, "#ffffff", 1.0);
        assert!(surface.get_pixel(50, 50).unwrap()[0] > 0);
        assert!(surface.get_pixel(130, 50).unwrap()[0] > 0);
        assert_eq!(surface.get_pixel(50, 150).unwrap()[0], 0);
    }

    #[test]
    fn test_ambient_occlusion_darkens_crevices() {
        let mut flat = gray(120);
        let before = flat.clone();
        ambient_occlusion(&mut flat);
        assert_eq!(flat, before);

        let mut surface = gray(250);
        surface.set_pixel(10, 10, [100, 100, 100, 255]);
        ambient_occlusion(&mut surface);
        assert!(surface.get_pixel(10, 10).unwrap()[0] < 100);
    }

    #[test]
    fn test_sanitize_clamps() {
        let options = PostOptions {
            motion_blur: 3.0,
            vignette: -1.0,
            ray_count: 0,
            ..PostOptions::default()
        }
        .sanitize();
        assert_eq!(options.motion_blur, 1.0);
        assert_eq!(options.vignette, 0.0);
        assert_eq!(options.ray_count, 1);
    }
}
