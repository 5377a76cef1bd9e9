use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec2;
use std::io::Write;
use std::path::PathBuf;

use crate::color::Color;
use crate::compositor::{EffectContext, FrameCompositor};
use crate::config::FxConfig;
use crate::events::FxTimeline;
use crate::rng::FxRng;
use crate::surface::{BlendMode, Surface};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render effect frames to disk
    Render {
        /// Output directory for frames
        #[arg(long)]
        out: PathBuf,

        /// Number of frames to render
        #[arg(long, default_value_t = 120)]
        frames: u64,

        /// Output width
        #[arg(long, default_value_t = 640, value_parser = clap::value_parser!(u32).range(1..))]
        width: u32,

        /// Output height
        #[arg(long, default_value_t = 360, value_parser = clap::value_parser!(u32).range(1..))]
        height: u32,

        /// Effect config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Event timeline JSON file (defaults to a built-in demo)
        #[arg(long)]
        timeline: Option<PathBuf>,

        /// Skip the accelerated bloom pass
        #[arg(long)]
        no_bloom: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            out,
            frames,
            width,
            height,
            config,
            timeline,
            no_bloom,
        } => {
            let mut config = match config {
                Some(path) => FxConfig::load(&path)?,
                None => FxConfig::default(),
            };
            if no_bloom {
                config.bloom.enabled = false;
            }
            let timeline = match timeline {
                Some(path) => FxTimeline::load(&path)?,
                None => FxTimeline::demo(width, height),
            };
            render_offline(out, frames, width, height, config, &timeline)?;
        }
    }
    Ok(())
}

/// Procedural scrolling background standing in for the game scene.
struct Starfield {
    stars: Vec<Star>,
    height: f32,
}

struct Star {
    pos: Vec2,
    speed: f32,
    brightness: f32,
}

impl Starfield {
    fn new(seed: u64, width: u32, height: u32, count: usize) -> Self {
        let mut rng = FxRng::new(seed ^ 0x5354_4152);
        let stars = (0..count)
            .map(|_| Star {
                pos: Vec2::new(rng.range(0.0, width as f32), rng.range(0.0, height as f32)),
                speed: rng.range(0.2, 1.5),
                brightness: rng.range(0.3, 1.0),
            })
            .collect();
        Self {
            stars,
            height: height as f32,
        }
    }

    fn draw(&self, surface: &mut Surface, frame: u64, offset: Vec2) {
        surface.fill(Color::rgb8(4, 4, 14));
        for star in &self.stars {
            let y = (star.pos.y + star.speed * frame as f32).rem_euclid(self.height);
            surface.fill_circle(
                star.pos.x + offset.x,
                y + offset.y,
                star.speed,
                Color::WHITE.with_alpha(star.brightness),
                BlendMode::SourceOver,
            );
        }
    }
}

fn render_offline(
    out_dir: PathBuf,
    total_frames: u64,
    width: u32,
    height: u32,
    config: FxConfig,
    timeline: &FxTimeline,
) -> Result<()> {
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let starfield = Starfield::new(config.seed, width, height, 160);
    let mut fx = FrameCompositor::new(EffectContext::with_config(width, height, config));
    let options = fx.default_options();
    let mut surface = Surface::new(width, height);

    println!("Rendering {} frames to {:?}...", total_frames, out_dir);

    for i in 0..total_frames {
        for event in timeline.events_at(i) {
            event.apply(&mut fx);
        }
        fx.tick();

        let shake = fx.shake_offset();
        starfield.draw(&mut surface, i, shake);
        fx.compose(&mut surface, &options);

        let frame_path = out_dir.join(format!("frame_{:05}.png", i));
        image::save_buffer(
            &frame_path,
            surface.pixels(),
            width,
            height,
            image::ColorType::Rgba8,
        )
        .with_context(|| format!("Failed to write {}", frame_path.display()))?;

        if i % 10 == 0 {
            print!(".");
            std::io::stdout().flush()?;
        }
    }
    println!("\nDone.");

    Ok(())
}
