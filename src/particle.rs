//! Particle simulator: explosions, trails, sparks and bursts.
//!
//! Particles are integer-life point sprites owned exclusively by the
//! [`ParticleSimulator`]. Emitters push fully initialised particles; `tick`
//! integrates them, purges the dead and enforces the live cap by dropping
//! the oldest surplus. Spawns never trim, so one large burst may overshoot
//! the cap until the next tick.

use std::f32::consts::{PI, TAU};

use glam::Vec2;

use crate::color::{explosion_palette, Color, LEVEL_UP_PALETTE};
use crate::compositor::EffectContext;
use crate::rng::FxRng;
use crate::size_class::SizeClass;
use crate::surface::{BlendMode, Surface};

/// Per-tick velocity damping.
pub const DRAG: f32 = 0.98;
/// Per-tick size factor for shrinking particles.
pub const SHRINK_RATE: f32 = 0.95;
/// Floor for shrinking particles.
pub const MIN_SIZE: f32 = 0.5;
/// Downward acceleration applied to explosion debris.
pub const EXPLOSION_GRAVITY: f32 = 0.1;
/// Default duration (ticks) of a shake request.
pub const DEFAULT_SHAKE_DURATION: u32 = 10;

/// Sprite shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticleShape {
    Disc,
    Square,
    Star,
    /// A short streak drawn back along the velocity.
    Spark,
}

/// A single particle.
#[derive(Clone, Debug)]
pub struct Particle {
    pub pos: Vec2,
    pub vel: Vec2,
    pub color: Color,
    /// Remaining life in ticks.
    pub life: i32,
    /// Life at spawn.
    pub max_life: i32,
    pub size: f32,
    /// Whether `size` decays each tick.
    pub shrink: bool,
    pub shape: ParticleShape,
    pub rotation: f32,
    pub rotation_speed: f32,
    /// Added to `vel.y` each tick.
    pub gravity: f32,
    /// `life / max_life`, refreshed each tick.
    pub alpha: f32,
}

impl Particle {
    pub fn new(pos: Vec2, vel: Vec2, color: Color, life: i32, size: f32) -> Self {
        let life = life.max(1);
        Self {
            pos,
            vel,
            color,
            life,
            max_life: life,
            size,
            shrink: true,
            shape: ParticleShape::Disc,
            rotation: 0.0,
            rotation_speed: 0.0,
            gravity: 0.0,
            alpha: 1.0,
        }
    }

    pub fn with_shape(mut self, shape: ParticleShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_gravity(mut self, gravity: f32) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_rotation(mut self, rotation: f32, speed: f32) -> Self {
        self.rotation = rotation;
        self.rotation_speed = speed;
        self
    }

    pub fn with_shrink(mut self, shrink: bool) -> Self {
        self.shrink = shrink;
        self
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.life > 0
    }

    /// Advance one tick.
    pub fn update(&mut self) {
        self.pos += self.vel;
        self.vel.y += self.gravity;
        self.vel *= DRAG;
        self.rotation = (self.rotation + self.rotation_speed) % TAU;
        self.life -= 1;
        self.alpha = (self.life as f32 / self.max_life as f32).max(0.0);
        if self.shrink {
            // Particles spawned below the floor hold their size
            self.size = (self.size * SHRINK_RATE).max(MIN_SIZE.min(self.size));
        }
    }

    fn draw(&self, surface: &mut Surface) {
        let color = self.color.fade(self.alpha);
        match self.shape {
            ParticleShape::Disc => {
                surface.fill_circle(self.pos.x, self.pos.y, self.size, color, BlendMode::SourceOver);
            }
            ParticleShape::Square => {
                let corners = regular_polygon(self.pos, self.size * std::f32::consts::SQRT_2, 4, self.rotation + PI / 4.0);
                surface.fill_polygon(&corners, color, BlendMode::SourceOver);
            }
            ParticleShape::Star => {
                let points = star_points(self.pos, self.size * 1.5, self.size * 0.6, self.rotation);
                surface.fill_polygon(&points, color, BlendMode::Additive);
            }
            ParticleShape::Spark => {
                let tail = self.pos - self.vel * 3.0;
                surface.draw_line_gradient(
                    self.pos,
                    tail,
                    (self.size * 0.5).max(1.0),
                    color,
                    color.with_alpha(0.0),
                    BlendMode::Additive,
                );
            }
        }
    }
}

fn regular_polygon(center: Vec2, radius: f32, sides: usize, rotation: f32) -> Vec<Vec2> {
    (0..sides)
        .map(|i| {
            let a = rotation + TAU * i as f32 / sides as f32;
            center + Vec2::new(a.cos(), a.sin()) * radius
        })
        .collect()
}

fn star_points(center: Vec2, outer: f32, inner: f32, rotation: f32) -> Vec<Vec2> {
    (0..10)
        .map(|i| {
            let r = if i % 2 == 0 { outer } else { inner };
            let a = rotation - PI / 2.0 + PI * i as f32 / 5.0;
            center + Vec2::new(a.cos(), a.sin()) * r
        })
        .collect()
}

// ============================================================================
// Screen shake
// ============================================================================

/// Decaying camera shake. Concurrent requests are max-combined.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScreenShake {
    pub intensity: f32,
    /// Remaining ticks.
    pub duration: u32,
}

impl ScreenShake {
    /// Merge a request: the maximum of intensity and of duration wins.
    /// Zero-length requests are ignored.
    pub fn request(&mut self, intensity: f32, duration: u32) {
        if duration == 0 {
            return;
        }
        self.intensity = self.intensity.max(intensity.max(0.0));
        self.duration = self.duration.max(duration);
    }

    pub fn tick(&mut self) {
        if self.duration > 0 {
            self.duration -= 1;
            if self.duration == 0 {
                self.intensity = 0.0;
            }
        }
    }

    /// Upper bound on the offset length this tick.
    pub fn magnitude(&self) -> f32 {
        let decay = (self.duration as f32 / DEFAULT_SHAKE_DURATION as f32).min(1.0);
        self.intensity * decay
    }

    pub fn is_active(&self) -> bool {
        self.duration > 0 && self.intensity > 0.0
    }

    pub fn reset(&mut self) {
        *self = ScreenShake::default();
    }
}

// ============================================================================
// Simulator
// ============================================================================

/// Owns every live particle and the screen shake state.
pub struct ParticleSimulator {
    particles: Vec<Particle>,
    max_particles: usize,
    shake: ScreenShake,
    rng: FxRng,
}

impl ParticleSimulator {
    pub fn new(ctx: &EffectContext) -> Self {
        let max_particles = ctx.config.particles.max_particles.max(1);
        Self {
            // Headroom for a burst on top of a full simulator
            particles: Vec::with_capacity(max_particles + SizeClass::Huge.particle_count()),
            max_particles,
            shake: ScreenShake::default(),
            rng: FxRng::new(ctx.config.seed ^ 0x5041_5254),
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn max_particles(&self) -> usize {
        self.max_particles
    }

    pub fn shake(&self) -> &ScreenShake {
        &self.shake
    }

    /// Enqueue a particle. The cap is applied at the next tick.
    pub fn emit(&mut self, particle: Particle) {
        self.particles.push(particle);
    }

    /// Radial debris burst. Count and shake scale with `size`.
    pub fn spawn_explosion(&mut self, x: f32, y: f32, size: SizeClass, color_seed: &str) {
        let palette = explosion_palette(color_seed);
        let count = size.particle_count();
        let origin = Vec2::new(x, y);

        for i in 0..count {
            let angle = TAU * i as f32 / count as f32 + self.rng.jitter(0.25);
            let speed = self.rng.range(2.0, 6.0);
            let color = self.rng.pick(palette).copied().unwrap_or(Color::FALLBACK);
            let shape = if self.rng.chance(0.3) {
                ParticleShape::Star
            } else {
                ParticleShape::Disc
            };
            let life = self.rng.range_i32(20, 40);
            let particle = Particle::new(origin, Vec2::from_angle(angle) * speed, color, life, self.rng.range(2.0, 5.0))
                .with_shape(shape)
                .with_gravity(EXPLOSION_GRAVITY)
                .with_rotation(self.rng.range(0.0, TAU), self.rng.jitter(0.2));
            self.emit(particle);
        }

        self.request_shake(size.shake_intensity(), DEFAULT_SHAKE_DURATION);
    }

    /// Engine exhaust puff; `intensity` scales count and size.
    pub fn spawn_trail(&mut self, x: f32, y: f32, color: &str, intensity: f32) {
        let intensity = intensity.clamp(0.0, 4.0);
        let color = Color::parse_or(color, Color::FALLBACK);
        let count = ((intensity * 3.0).round() as usize).max(1);
        for _ in 0..count {
            let vel = Vec2::new(self.rng.jitter(0.5), self.rng.range(0.5, 1.5));
            let life = self.rng.range_i32(10, 20);
            let size = self.rng.range(1.0, 3.0) * intensity.max(0.5);
            let pos = Vec2::new(x + self.rng.jitter(2.0), y);
            self.emit(Particle::new(pos, vel, color, life, size));
        }
    }

    /// Streaks left behind a moving bullet.
    pub fn spawn_bullet_trail(&mut self, x: f32, y: f32, vx: f32, vy: f32, color: &str) {
        let color = Color::parse_or(color, Color::WHITE);
        let back = Vec2::new(vx, vy) * -0.2;
        for _ in 0..2 {
            let vel = back + Vec2::new(self.rng.jitter(0.3), self.rng.jitter(0.3));
            let life = self.rng.range_i32(8, 14);
            self.emit(
                Particle::new(Vec2::new(x, y), vel, color, life, 1.5)
                    .with_shape(ParticleShape::Spark)
                    .with_shrink(false),
            );
        }
    }

    /// Ring burst for a picked-up item; drifts upward.
    pub fn spawn_collect_burst(&mut self, x: f32, y: f32, color: &str) {
        let color = Color::parse_or(color, Color::hex(0xffd700));
        let count = 12;
        for i in 0..count {
            let angle = TAU * i as f32 / count as f32;
            let life = self.rng.range_i32(25, 35);
            self.emit(
                Particle::new(Vec2::new(x, y), Vec2::from_angle(angle) * 3.0, color, life, 3.0)
                    .with_shape(ParticleShape::Square)
                    .with_rotation(angle, 0.15)
                    .with_gravity(-0.05),
            );
        }
    }

    /// Directional sparks where a weapon hit at `angle` (radians).
    pub fn spawn_hit_spark(&mut self, x: f32, y: f32, angle: f32, color: &str) {
        let color = Color::parse_or(color, Color::WHITE);
        for _ in 0..6 {
            let a = angle + self.rng.jitter(0.5);
            let speed = self.rng.range(3.0, 7.0);
            let life = self.rng.range_i32(8, 16);
            self.emit(
                Particle::new(Vec2::new(x, y), Vec2::from_angle(a) * speed, color, life, 2.0)
                    .with_shape(ParticleShape::Spark)
                    .with_gravity(0.05),
            );
        }
    }

    /// Large celebratory multi-color burst.
    pub fn spawn_level_up_burst(&mut self, x: f32, y: f32) {
        let count = 60;
        for i in 0..count {
            let angle = TAU * i as f32 / count as f32 + self.rng.jitter(0.1);
            let speed = self.rng.range(3.0, 8.0);
            let color = self.rng.pick(&LEVEL_UP_PALETTE).copied().unwrap_or(Color::WHITE);
            let shape = if self.rng.chance(0.5) {
                ParticleShape::Star
            } else {
                ParticleShape::Disc
            };
            let life = self.rng.range_i32(40, 60);
            let particle = Particle::new(Vec2::new(x, y), Vec2::from_angle(angle) * speed, color, life, self.rng.range(2.0, 4.0))
                .with_shape(shape)
                .with_gravity(-0.02)
                .with_rotation(self.rng.range(0.0, TAU), self.rng.jitter(0.3));
            self.emit(particle);
        }
    }

    /// Ring of particles on a shield's rim, drifting outward.
    pub fn spawn_shield_hit(&mut self, x: f32, y: f32, radius: f32, color: &str) {
        let color = Color::parse_or(color, Color::hex(0x00ccff));
        let center = Vec2::new(x, y);
        let count = 24;
        for i in 0..count {
            let dir = Vec2::from_angle(TAU * i as f32 / count as f32);
            let life = self.rng.range_i32(15, 25);
            let speed = self.rng.range(1.0, 2.0);
            self.emit(
                Particle::new(center + dir * radius.max(0.0), dir * speed, color, life, 2.0)
                    .with_shrink(false),
            );
        }
    }

    /// Fast radial streaks for a warp-in/out.
    pub fn spawn_warp_burst(&mut self, x: f32, y: f32, color: &str) {
        let color = Color::parse_or(color, Color::hex(0x9966ff));
        let count = 40;
        for i in 0..count {
            let angle = TAU * i as f32 / count as f32 + self.rng.jitter(0.05);
            let life = self.rng.range_i32(20, 30);
            let speed = self.rng.range(6.0, 12.0);
            self.emit(
                Particle::new(Vec2::new(x, y), Vec2::from_angle(angle) * speed, color, life, 2.5)
                    .with_shape(ParticleShape::Spark),
            );
        }
    }

    /// Request camera shake; merged with any pending request by max.
    ///
    /// The offset bound is `intensity * min(duration / 10, 1)`, so durations
    /// beyond [`DEFAULT_SHAKE_DURATION`] extend the shake without raising
    /// its peak. A zero duration is a no-op.
    pub fn request_shake(&mut self, intensity: f32, duration: u32) {
        self.shake.request(intensity, duration);
    }

    /// Random offset for this frame, no longer than the shake magnitude.
    pub fn current_shake_offset(&mut self) -> Vec2 {
        let magnitude = self.shake.magnitude();
        if magnitude <= 0.0 {
            return Vec2::ZERO;
        }
        Vec2::from_angle(self.rng.range(0.0, TAU)) * magnitude * self.rng.next_f32()
    }

    /// Advance every particle and the shake by one tick.
    pub fn tick(&mut self) {
        for p in &mut self.particles {
            p.update();
        }
        self.particles.retain(Particle::is_alive);

        if self.particles.len() > self.max_particles {
            let surplus = self.particles.len() - self.max_particles;
            self.particles.drain(..surplus);
        }

        self.shake.tick();
    }

    pub fn draw(&self, surface: &mut Surface) {
        for p in &self.particles {
            p.draw(surface);
        }
    }

    /// Drop every particle and any pending shake.
    pub fn clear(&mut self) {
        self.particles.clear();
        self.shake.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ORANGE_PALETTE;

    fn simulator() -> ParticleSimulator {
        ParticleSimulator::new(&EffectContext::new(320, 240))
    }

    #[test]
    fn test_explosion_particle_counts() {
        for size in SizeClass::ALL {
            let mut sim = simulator();
            sim.spawn_explosion(10.0, 10.0, size, "#ff6600");
            assert_eq!(sim.len(), size.particle_count());
        }
        let mut sim = simulator();
        sim.spawn_explosion(0.0, 0.0, SizeClass::Huge, "#ff6600");
        assert_eq!(sim.len(), 100);
    }

    #[test]
    fn test_medium_orange_explosion() {
        let mut sim = simulator();
        sim.spawn_explosion(100.0, 100.0, SizeClass::Medium, "#ff6600");
        assert_eq!(sim.len(), 25);
        for p in sim.particles() {
            assert!((20..40).contains(&p.life), "life {}", p.life);
            assert_eq!(p.gravity, 0.1);
            assert!(ORANGE_PALETTE.contains(&p.color));
            let speed = p.vel.length();
            assert!((2.0..6.0).contains(&speed) || (speed - 6.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_life_decrements_and_dead_are_purged() {
        let mut sim = simulator();
        sim.spawn_explosion(50.0, 50.0, SizeClass::Small, "#00ffff");
        let before: Vec<i32> = sim.particles().iter().map(|p| p.life).collect();
        sim.tick();
        let after: Vec<i32> = sim.particles().iter().map(|p| p.life).collect();
        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            assert_eq!(*a, b - 1);
        }

        let longest = *before.iter().max().unwrap();
        for _ in 1..longest {
            sim.tick();
            assert!(sim.particles().iter().all(|p| p.life > 0));
        }
        assert!(sim.is_empty());
    }

    #[test]
    fn test_shrink_follows_geometric_decay() {
        let mut sim = simulator();
        sim.emit(Particle::new(Vec2::ZERO, Vec2::ZERO, Color::WHITE, 200, 4.0));
        for n in 1..=100 {
            sim.tick();
            let expected = (4.0 * SHRINK_RATE.powi(n)).max(MIN_SIZE);
            let size = sim.particles()[0].size;
            assert!((size - expected).abs() < 1e-4, "tick {n}: {size} vs {expected}");
        }
    }

    #[test]
    fn test_alpha_and_size_never_increase() {
        let mut sim = simulator();
        sim.spawn_level_up_burst(0.0, 0.0);
        let mut prev: Vec<(f32, f32)> = sim.particles().iter().map(|p| (p.alpha, p.size)).collect();
        for _ in 0..30 {
            sim.tick();
            let now: Vec<(f32, f32)> = sim.particles().iter().map(|p| (p.alpha, p.size)).collect();
            // Nothing is purged before tick 40, so indices line up
            for (p, n) in prev.iter().zip(&now) {
                assert!(n.0 <= p.0 && n.1 <= p.1);
            }
            prev = now;
        }
    }

    #[test]
    fn test_cap_drops_oldest_at_tick_time() {
        let mut sim = simulator();
        sim.spawn_explosion(0.0, 0.0, SizeClass::Huge, "#ff6600");
        for _ in 0..5 {
            sim.spawn_explosion(1000.0, 0.0, SizeClass::Huge, "#ff6600");
        }
        // Bursts may overshoot until the next tick
        assert_eq!(sim.len(), 600);

        sim.tick();
        assert_eq!(sim.len(), 500);
        assert!(sim.particles().iter().all(|p| p.pos.x > 500.0));
    }

    #[test]
    fn test_huge_explosion_shake_bound_and_decay() {
        let mut sim = simulator();
        sim.spawn_explosion(0.0, 0.0, SizeClass::Huge, "#ff6600");
        assert!(sim.shake().magnitude() <= 15.0);
        for _ in 0..50 {
            assert!(sim.current_shake_offset().length() <= 15.0 + 1e-4);
        }
        for _ in 0..10 {
            sim.tick();
        }
        assert_eq!(sim.shake().intensity, 0.0);
        assert_eq!(sim.current_shake_offset(), Vec2::ZERO);
    }

    #[test]
    fn test_concurrent_shake_requests_take_max() {
        let mut sim = simulator();
        sim.request_shake(5.0, DEFAULT_SHAKE_DURATION);
        sim.request_shake(15.0, DEFAULT_SHAKE_DURATION);
        assert_eq!(sim.shake().intensity, 15.0);

        sim.request_shake(3.0, 30);
        assert_eq!(sim.shake().intensity, 15.0);
        assert_eq!(sim.shake().duration, 30);
    }

    #[test]
    fn test_shake_magnitude_decays_with_duration() {
        let mut shake = ScreenShake::default();
        shake.request(10.0, 10);
        shake.tick();
        assert!((shake.magnitude() - 9.0).abs() < 1e-5);
        for _ in 0..4 {
            shake.tick();
        }
        assert!((shake.magnitude() - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_duration_shake_leaves_no_residue() {
        let mut sim = simulator();
        sim.request_shake(15.0, 0);
        assert_eq!(sim.shake(), &ScreenShake::default());
        for _ in 0..100 {
            sim.tick();
        }
        sim.spawn_explosion(0.0, 0.0, SizeClass::Small, "#ff6600");
        assert_eq!(sim.shake().intensity, 2.0);
        assert!(sim.shake().magnitude() <= 2.0);
    }

    #[test]
    fn test_long_shake_peak_is_capped_at_intensity() {
        let mut sim = simulator();
        sim.request_shake(4.0, 40);
        assert_eq!(sim.shake().magnitude(), 4.0);
        for _ in 0..30 {
            sim.tick();
        }
        assert_eq!(sim.shake().magnitude(), 4.0);
        sim.tick();
        assert!(sim.shake().magnitude() < 4.0);
    }

    #[test]
    fn test_tiny_particle_never_grows() {
        let mut sim = simulator();
        sim.emit(Particle::new(Vec2::ZERO, Vec2::ZERO, Color::WHITE, 20, 0.2));
        let mut prev = 0.2;
        for _ in 0..10 {
            sim.tick();
            let size = sim.particles()[0].size;
            assert!(size <= prev, "{size} > {prev}");
            prev = size;
        }
    }

    #[test]
    fn test_draw_before_tick_and_after_clear_is_empty() {
        let sim = simulator();
        let mut surface = Surface::new(32, 32);
        sim.draw(&mut surface);
        assert!(surface.is_uniform([0, 0, 0, 0]));

        let mut sim = simulator();
        sim.spawn_explosion(16.0, 16.0, SizeClass::Large, "#ff6600");
        sim.spawn_warp_burst(16.0, 16.0, "#9966ff");
        sim.clear();
        sim.draw(&mut surface);
        assert!(surface.is_uniform([0, 0, 0, 0]));
        assert!(!sim.shake().is_active());
    }

    #[test]
    fn test_emitters_draw_something() {
        let mut sim = simulator();
        sim.spawn_trail(16.0, 16.0, "#ffaa00", 1.0);
        sim.spawn_bullet_trail(16.0, 16.0, 0.0, -8.0, "#ffffff");
        sim.spawn_collect_burst(16.0, 16.0, "#ffd700");
        sim.spawn_hit_spark(16.0, 16.0, 0.0, "#ffffff");
        sim.spawn_shield_hit(16.0, 16.0, 8.0, "#00ccff");
        sim.spawn_warp_burst(16.0, 16.0, "bogus");
        assert_eq!(sim.len(), 3 + 2 + 12 + 6 + 24 + 40);

        sim.tick();
        let mut surface = Surface::new(32, 32);
        surface.fill(Color::BLACK);
        sim.draw(&mut surface);
        assert!(!surface.is_uniform([0, 0, 0, 255]));
    }
}
