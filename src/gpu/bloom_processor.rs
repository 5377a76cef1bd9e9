//! Bloom extractor.
//!
//! The accelerated backend renders one fullscreen fragment pass with wgpu:
//! 1. Bright pass - keep `color * max(luminance - threshold, 0)`
//! 2. Separable blur - 7 taps horizontally and vertically, averaged
//! 3. Composite - add `blur * intensity * tint` to the original frame
//!
//! When no adapter or device is available the extractor falls back to
//! `BloomBackend::Disabled` and `apply_bloom` leaves the surface untouched.

use anyhow::{anyhow, Context, Result};
use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::surface::Surface;

/// Gaussian weights for the center tap and the three symmetric tap pairs.
pub const BLUR_WEIGHTS: [f32; 4] = [0.2707, 0.2167, 0.1113, 0.0366];

/// Warm tint applied to the glow before recombining.
pub const BLOOM_TINT: [f32; 3] = [1.2, 1.1, 1.0];

const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniforms for the bloom pass
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BloomUniforms {
    texel_size: [f32; 2],
    intensity: f32,
    threshold: f32,
}

/// Vertex for fullscreen quad
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

const QUAD_VERTICES: &[QuadVertex] = &[
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [ 1.0, -1.0], uv: [1.0, 1.0] },
    QuadVertex { position: [ 1.0,  1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0, -1.0], uv: [0.0, 1.0] },
    QuadVertex { position: [ 1.0,  1.0], uv: [1.0, 0.0] },
    QuadVertex { position: [-1.0,  1.0], uv: [0.0, 0.0] },
];

/// Row pitch of a readback buffer, padded to wgpu's copy alignment.
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded + (align - unpadded % align) % align
}

/// Size-dependent resources, rebuilt on resize.
struct BloomTargets {
    width: u32,
    height: u32,
    source: wgpu::Texture,
    source_bind_group: wgpu::BindGroup,
    output: wgpu::Texture,
    output_view: wgpu::TextureView,
    readback: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

impl BloomTargets {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        width: u32,
        height: u32,
    ) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let source = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bloom Source Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());

        let source_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Source Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bloom Output Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_bytes_per_row = padded_bytes_per_row(width);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bloom Readback Buffer"),
            size: (padded_bytes_per_row * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            width,
            height,
            source,
            source_bind_group,
            output,
            output_view,
            readback,
            padded_bytes_per_row,
        }
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Headless wgpu bloom pass over a `Surface`.
pub struct GpuBloom {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    quad_vertex_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    targets: BloomTargets,
}

impl GpuBloom {
    /// Acquire a headless adapter and device and build the pipeline.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    async fn new_async(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // Headless
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("No GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Bloom Device"),
                    ..Default::default()
                },
                None,
            )
            .await
            .context("Failed to create bloom device")?;

        Ok(Self::from_device(device, queue, width, height))
    }

    /// Build the pipeline on an existing device.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let quad_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Quad Buffer"),
            contents: bytemuck::cast_slice(QUAD_VERTICES),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Texture Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bloom Uniform Buffer"),
            size: std::mem::size_of::<BloomUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline = Self::create_pipeline(&device, &texture_layout, &uniform_layout);
        let targets = BloomTargets::new(&device, &texture_layout, &sampler, width, height);

        Self {
            device,
            queue,
            pipeline,
            texture_layout,
            uniform_buffer,
            uniform_bind_group,
            quad_vertex_buffer,
            sampler,
            targets,
        }
    }

    fn create_pipeline(
        device: &wgpu::Device,
        texture_layout: &wgpu::BindGroupLayout,
        uniform_layout: &wgpu::BindGroupLayout,
    ) -> wgpu::RenderPipeline {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bloom Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("bloom.wgsl").into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bloom Pipeline Layout"),
            bind_group_layouts: &[texture_layout, uniform_layout],
            push_constant_ranges: &[],
        });

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Bloom Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[QuadVertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.targets.width, self.targets.height)
    }

    /// Rebuild the size-dependent textures and readback buffer.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width.max(1), height.max(1)) == self.size() {
            return;
        }
        self.targets = BloomTargets::new(&self.device, &self.texture_layout, &self.sampler, width, height);
    }

    /// Upload `surface`, run the bloom pass and write the result back.
    /// On error the surface is left unchanged.
    pub fn apply(&mut self, surface: &mut Surface, intensity: f32, threshold: f32) -> Result<()> {
        if surface.width() == 0 || surface.height() == 0 {
            return Ok(());
        }
        self.resize(surface.width(), surface.height());
        let targets = &self.targets;

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &targets.source,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            surface.pixels(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(targets.width * 4),
                rows_per_image: Some(targets.height),
            },
            targets.extent(),
        );

        let uniforms = BloomUniforms {
            texel_size: [1.0 / targets.width as f32, 1.0 / targets.height as f32],
            intensity,
            threshold,
        };
        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Bloom Encoder"),
            });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Bloom Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &targets.output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &targets.source_bind_group, &[]);
            pass.set_bind_group(1, &self.uniform_bind_group, &[]);
            pass.set_vertex_buffer(0, self.quad_vertex_buffer.slice(..));
            pass.draw(0..6, 0..1);
        }

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &targets.output,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &targets.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_bytes_per_row),
                    rows_per_image: Some(targets.height),
                },
            },
            targets.extent(),
        );

        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = targets.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .context("Bloom readback callback dropped")?
            .context("Failed to map bloom readback buffer")?;

        {
            let data = buffer_slice.get_mapped_range();
            let row_bytes = (targets.width * 4) as usize;
            for (y, row) in surface.pixels_mut().chunks_exact_mut(row_bytes).enumerate() {
                let start = y * targets.padded_bytes_per_row as usize;
                row.copy_from_slice(&data[start..start + row_bytes]);
            }
        }
        targets.readback.unmap();

        Ok(())
    }
}

/// Which implementation `BloomExtractor` dispatches to.
pub enum BloomBackend {
    Accelerated(Box<GpuBloom>),
    Disabled,
}

/// Bloom with graceful degradation: if the accelerated backend cannot be
/// created, `apply_bloom` is a no-op.
pub struct BloomExtractor {
    backend: BloomBackend,
    enabled: bool,
    warned: bool,
}

impl Default for BloomExtractor {
    fn default() -> Self {
        Self::disabled()
    }
}

impl BloomExtractor {
    /// Try the accelerated backend at the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let mut bloom = Self::disabled();
        bloom.initialize(width, height);
        bloom
    }

    /// An extractor that never touches the surface.
    pub fn disabled() -> Self {
        Self {
            backend: BloomBackend::Disabled,
            enabled: false,
            warned: false,
        }
    }

    /// Create the wgpu backend. Returns whether bloom is enabled.
    pub fn initialize(&mut self, width: u32, height: u32) -> bool {
        self.initialize_with(width, height, GpuBloom::new)
    }

    /// Create the backend with `factory`; an error selects `Disabled`.
    pub fn initialize_with<F>(&mut self, width: u32, height: u32, factory: F) -> bool
    where
        F: FnOnce(u32, u32) -> Result<GpuBloom>,
    {
        match factory(width.max(1), height.max(1)) {
            Ok(gpu) => {
                log::info!("Bloom: accelerated backend ready ({}x{})", width, height);
                self.backend = BloomBackend::Accelerated(Box::new(gpu));
                self.enabled = true;
            }
            Err(e) => {
                self.warn_once(&format!("Bloom unavailable, continuing without it: {:#}", e));
                self.backend = BloomBackend::Disabled;
                self.enabled = false;
            }
        }
        self.enabled
    }

    fn warn_once(&mut self, message: &str) {
        if !self.warned {
            log::warn!("{}", message);
            self.warned = true;
        }
    }

    pub fn backend(&self) -> &BloomBackend {
        &self.backend
    }

    /// Whether an accelerated backend exists, regardless of `enabled`.
    pub fn is_available(&self) -> bool {
        matches!(self.backend, BloomBackend::Accelerated(_))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle bloom. Cannot enable a `Disabled` backend.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled && self.is_available();
    }

    /// Apply bloom in place. No-op when disabled or `intensity <= 0`.
    pub fn apply_bloom(&mut self, surface: &mut Surface, intensity: f32, threshold: f32) {
        if !self.enabled || intensity <= 0.0 {
            return;
        }
        let result = match &mut self.backend {
            BloomBackend::Accelerated(gpu) => gpu.apply(surface, intensity, threshold.clamp(0.0, 1.0)),
            BloomBackend::Disabled => return,
        };
        if let Err(e) = result {
            self.warn_once(&format!("Bloom pass failed, frame left unbloomed: {:#}", e));
        }
    }

    /// Resize the backend's offscreen textures.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let BloomBackend::Accelerated(gpu) = &mut self.backend {
            gpu.resize(width, height);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;

    #[test]
    fn test_blur_weights_normalised() {
        let sum = BLUR_WEIGHTS[0] + 2.0 * BLUR_WEIGHTS[1..].iter().sum::<f32>();
        assert!((sum - 1.0).abs() < 1e-3, "sum {sum}");
        assert!(BLUR_WEIGHTS.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<BloomUniforms>(), 16);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn test_failed_factory_disables_bloom() {
        let mut bloom = BloomExtractor::disabled();
        let enabled = bloom.initialize_with(64, 64, |_, _| Err(anyhow!("no adapter")));
        assert!(!enabled);
        assert!(!bloom.is_enabled());
        assert!(matches!(bloom.backend(), BloomBackend::Disabled));

        bloom.set_enabled(true);
        assert!(!bloom.is_enabled());
    }

    #[test]
    fn test_disabled_bloom_leaves_pixels_unchanged() {
        let mut bloom = BloomExtractor::disabled();
        bloom.initialize_with(32, 32, |_, _| Err(anyhow!("no adapter")));

        let mut surface = Surface::new(32, 32);
        surface.fill(Color::rgb8(10, 20, 30));
        surface.fill_circle(16.0, 16.0, 6.0, Color::WHITE, Default::default());
        let before = surface.clone();

        bloom.apply_bloom(&mut surface, 1.0, 0.5);
        bloom.resize(64, 64);
        bloom.apply_bloom(&mut surface, 1.0, 0.5);
        assert_eq!(surface, before);
    }
}
