//! Per-frame orchestration of every effect engine.
//!
//! Each frame the host calls `tick` once, draws its own scene onto the
//! surface, then calls `compose`. Passes run in a fixed order because each
//! reads what the previous one wrote:
//!
//! lighting → volumetric → particles → bloom → post-process

use glam::Vec2;

use crate::config::FxConfig;
use crate::gpu::bloom_processor::BloomExtractor;
use crate::lighting::LightingCompositor;
use crate::particle::ParticleSimulator;
use crate::post_processing::{PostOptions, PostProcessStack};
use crate::size_class::SizeClass;
use crate::surface::Surface;
use crate::volumetric::VolumetricLayer;

/// Explicitly owned session context handed to every engine constructor.
#[derive(Clone, Debug)]
pub struct EffectContext {
    pub width: u32,
    pub height: u32,
    pub config: FxConfig,
}

impl EffectContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_config(width, height, FxConfig::default())
    }

    pub fn with_config(width: u32, height: u32, config: FxConfig) -> Self {
        Self {
            width,
            height,
            config: config.sanitize(),
        }
    }
}

/// Options for one `compose` call.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOptions {
    pub post: PostOptions,
    pub bloom: bool,
    pub bloom_intensity: f32,
    pub bloom_threshold: f32,
}

impl FrameOptions {
    pub fn from_config(config: &FxConfig) -> Self {
        Self {
            post: config.post.clone(),
            bloom: config.bloom.enabled,
            bloom_intensity: config.bloom.intensity,
            bloom_threshold: config.bloom.threshold,
        }
    }
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self::from_config(&FxConfig::default())
    }
}

pub struct FrameCompositor {
    ctx: EffectContext,
    particles: ParticleSimulator,
    lighting: LightingCompositor,
    volumetric: VolumetricLayer,
    post: PostProcessStack,
    bloom: BloomExtractor,
    frame: u64,
}

impl FrameCompositor {
    /// Build every engine, attempting accelerated bloom if the config enables it.
    pub fn new(ctx: EffectContext) -> Self {
        let bloom = if ctx.config.bloom.enabled {
            BloomExtractor::new(ctx.width, ctx.height)
        } else {
            log::info!("Bloom disabled by config");
            BloomExtractor::disabled()
        };
        Self::with_bloom(ctx, bloom)
    }

    /// Build every engine around an already constructed bloom extractor.
    pub fn with_bloom(ctx: EffectContext, bloom: BloomExtractor) -> Self {
        log::info!(
            "Frame compositor ready: {}x{}, bloom {}",
            ctx.width,
            ctx.height,
            if bloom.is_enabled() { "on" } else { "off" }
        );
        Self {
            particles: ParticleSimulator::new(&ctx),
            lighting: LightingCompositor::new(&ctx),
            volumetric: VolumetricLayer::new(&ctx),
            post: PostProcessStack::new(&ctx),
            bloom,
            frame: 0,
            ctx,
        }
    }

    pub fn context(&self) -> &EffectContext {
        &self.ctx
    }

    pub fn size(&self) -> (u32, u32) {
        (self.ctx.width, self.ctx.height)
    }

    /// Ticks since construction.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Frame options seeded from the config.
    pub fn default_options(&self) -> FrameOptions {
        FrameOptions::from_config(&self.ctx.config)
    }

    pub fn particles(&self) -> &ParticleSimulator {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSimulator {
        &mut self.particles
    }

    pub fn lighting(&self) -> &LightingCompositor {
        &self.lighting
    }

    pub fn lighting_mut(&mut self) -> &mut LightingCompositor {
        &mut self.lighting
    }

    pub fn volumetric(&self) -> &VolumetricLayer {
        &self.volumetric
    }

    pub fn volumetric_mut(&mut self) -> &mut VolumetricLayer {
        &mut self.volumetric
    }

    pub fn post(&self) -> &PostProcessStack {
        &self.post
    }

    pub fn post_mut(&mut self) -> &mut PostProcessStack {
        &mut self.post
    }

    pub fn bloom(&self) -> &BloomExtractor {
        &self.bloom
    }

    pub fn bloom_mut(&mut self) -> &mut BloomExtractor {
        &mut self.bloom
    }

    /// Advance every simulation by one frame.
    pub fn tick(&mut self) {
        self.particles.tick();
        self.lighting.tick();
        self.volumetric.tick();
        self.frame += 1;
    }

    /// Run every pass over `surface`, which already holds the host's scene.
    pub fn compose(&mut self, surface: &mut Surface, options: &FrameOptions) {
        if (surface.width(), surface.height()) != self.size() {
            self.resize(surface.width(), surface.height());
        }

        self.lighting.render(surface);
        self.volumetric.draw(surface);
        self.particles.draw(surface);
        if options.bloom {
            self.bloom
                .apply_bloom(surface, options.bloom_intensity, options.bloom_threshold);
        }
        self.post.apply_all(surface, &options.post);
    }

    /// Particle debris plus a volumetric fireball.
    pub fn spawn_explosion(&mut self, x: f32, y: f32, size: SizeClass, color: &str) {
        self.particles.spawn_explosion(x, y, size, color);
        self.volumetric.spawn(x, y, size, color);
    }

    /// Camera offset for this frame.
    pub fn shake_offset(&mut self) -> Vec2 {
        self.particles.current_shake_offset()
    }

    /// Discard all effect state (level restart, game over).
    pub fn clear(&mut self) {
        self.particles.clear();
        self.lighting.clear();
        self.volumetric.clear();
        self.post.clear();
    }

    /// Resize the offscreen buffers.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) == self.size() {
            return;
        }
        log::info!("Resizing effects to {}x{}", width, height);
        self.ctx.width = width;
        self.ctx.height = height;
        self.lighting.resize(width, height);
        self.bloom.resize(width, height);
        self.post.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::particle::Particle;
    use crate::post_processing::ColorGrade;

    fn compositor() -> FrameCompositor {
        FrameCompositor::with_bloom(EffectContext::new(128, 96), BloomExtractor::disabled())
    }

    fn scene() -> Surface {
        let mut surface = Surface::new(128, 96);
        surface.fill(Color::rgb8(20, 20, 40));
        surface
    }

    #[test]
    fn test_compose_before_tick_is_noop() {
        let mut fx = compositor();
        let mut surface = scene();
        let before = surface.clone();
        fx.compose(&mut surface, &FrameOptions::default());
        assert_eq!(surface, before);
    }

    #[test]
    fn test_spawn_explosion_feeds_both_engines() {
        let mut fx = compositor();
        fx.spawn_explosion(64.0, 48.0, SizeClass::Large, "#ff6600");
        assert_eq!(fx.particles().len(), 50);
        assert_eq!(fx.volumetric().len(), 1);
        assert!(fx.shake_offset().length() <= 10.0);

        fx.tick();
        let mut surface = scene();
        let before = surface.clone();
        fx.compose(&mut surface, &FrameOptions::default());
        assert_ne!(surface, before);
    }

    #[test]
    fn test_clear_then_compose_is_noop() {
        let mut fx = compositor();
        fx.spawn_explosion(64.0, 48.0, SizeClass::Huge, "#00ffff");
        fx.lighting_mut().add_light(10.0, 10.0, "#ffffff", 1.0, 40.0);
        fx.tick();
        fx.clear();

        let mut surface = scene();
        let before = surface.clone();
        fx.compose(&mut surface, &FrameOptions::default());
        assert_eq!(surface, before);
        assert_eq!(fx.shake_offset(), Vec2::ZERO);
    }

    #[test]
    fn test_post_runs_after_particles() {
        let mut fx = compositor();
        fx.post_mut()
            .register_grade("black", ColorGrade::new(0.0, 0.0, 0.0, 1.0));
        fx.spawn_explosion(64.0, 48.0, SizeClass::Medium, "#ffffff");
        fx.tick();

        let mut options = FrameOptions::default();
        options.post.color_grade = Some("black".into());
        let mut surface = scene();
        fx.compose(&mut surface, &options);
        assert!(surface
            .pixels()
            .chunks_exact(4)
            .all(|px| px[0] == 0 && px[1] == 0 && px[2] == 0));
    }

    #[test]
    fn test_lighting_never_darkens_particles() {
        let mut fx = compositor();
        fx.lighting_mut().set_ambient_light(0.0);
        fx.lighting_mut().add_light(4.0, 4.0, "#ffffff", 1.0, 8.0);
        fx.particles_mut()
            .emit(Particle::new(Vec2::new(64.0, 48.0), Vec2::ZERO, Color::WHITE, 30, 5.0));

        let mut options = FrameOptions::default();
        options.bloom = false;
        options.post = PostOptions::default();
        let mut surface = scene();
        fx.compose(&mut surface, &options);

        assert_eq!(surface.get_pixel(64, 48), Some([255, 255, 255, 255]));
        let background = surface.get_pixel(120, 90).unwrap();
        assert!(background[2] < 40, "background {background:?}");
    }

    #[test]
    fn test_compose_follows_surface_size() {
        let mut fx = compositor();
        let mut surface = Surface::new(64, 32);
        fx.compose(&mut surface, &FrameOptions::default());
        assert_eq!(fx.size(), (64, 32));
    }

    #[test]
    fn test_disabled_config_skips_gpu_probe() {
        let mut config = FxConfig::default();
        config.bloom.enabled = false;
        let fx = FrameCompositor::new(EffectContext::with_config(32, 32, config));
        assert!(!fx.bloom().is_enabled());
        assert!(!fx.default_options().bloom);
    }
}
