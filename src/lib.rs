pub mod color;
pub mod surface;
pub mod rng;
pub mod size_class;
pub mod config;

// Effect engines
pub mod particle;
pub mod lighting;
pub mod volumetric;
pub mod post_processing;
pub mod gpu;

pub mod compositor;
pub mod events;

pub mod cli;
