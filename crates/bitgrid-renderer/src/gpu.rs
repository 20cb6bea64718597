// ABOUTME: Headless wgpu device setup and a render-to-texture target.
// ABOUTME: Draws flat and atlas-textured quads offscreen and reads them back.

use std::sync::Arc;

use bitgrid_core::Color;
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;
use wgpu::{Device, Queue};

use crate::atlas::GlyphAtlas;
use crate::target::{RenderError, RenderTarget};
use crate::vertex::Vertex;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,

    #[error("Failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("Render target {width}x{height} exceeds the device limit of {max} pixels per side")]
    TargetTooLarge { width: u32, height: u32, max: u32 },
}

/// Device and queue without a window surface
pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    pub async fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let info = adapter.get_info();
        tracing::info!("Using GPU adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Bitgrid Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        Ok(Self { device, queue })
    }

    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct Uniforms {
    target_size: [f32; 2],
    atlas_size: [f32; 2],
}

/// Vertex storage on the GPU, recreated larger when a draw outgrows it
struct QuadVertexBuffer {
    label: &'static str,
    buffer: wgpu::Buffer,
    quads: usize,
}

impl QuadVertexBuffer {
    fn new(device: &Device, label: &'static str, quads: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (quads.max(1) * 4 * std::mem::size_of::<Vertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { label, buffer, quads: quads.max(1) }
    }

    fn write(&mut self, device: &Device, queue: &Queue, vertices: &[Vertex]) {
        let quads = vertices.len() / 4;
        if quads > self.quads {
            *self = Self::new(device, self.label, quads);
        }
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(vertices));
    }
}

pub struct GpuTarget {
    ctx: Arc<GpuContext>,
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    atlas_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    // Uploaded atlas, keyed by atlas id
    atlas_binding: Option<(u64, [f32; 2], wgpu::BindGroup)>,
    flat_pipeline: wgpu::RenderPipeline,
    textured_pipeline: wgpu::RenderPipeline,
    background_vertices: QuadVertexBuffer,
    glyph_vertices: QuadVertexBuffer,
    index_buffer: wgpu::Buffer,
    index_quads: usize,
}

impl GpuTarget {
    pub fn new(ctx: Arc<GpuContext>, width: u32, height: u32) -> Result<Self, GpuError> {
        let device = &ctx.device;

        let max = device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(GpuError::TargetTooLarge { width, height, max });
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Quad Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/quad.wgsl").into()),
        });

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Grid Render Texture"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Quad Uniform Buffer"),
            contents: bytemuck::cast_slice(&[Uniforms {
                target_size: [width.max(1) as f32, height.max(1) as f32],
                atlas_size: [1.0, 1.0],
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Quad Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Quad Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let atlas_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Atlas Bind Group Layout"),
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

        // Nearest keeps glyph texels crisp and makes zero coordinates hit texel (0, 0)
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Atlas Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let flat_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Flat Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });
        let textured_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Textured Pipeline Layout"),
            bind_group_layouts: &[&uniform_layout, &atlas_layout],
            push_constant_ranges: &[],
        });

        let flat_pipeline =
            create_pipeline(device, &shader, &flat_layout, "Flat Pipeline", "fs_flat");
        let textured_pipeline =
            create_pipeline(device, &shader, &textured_layout, "Textured Pipeline", "fs_textured");

        let background_vertices = QuadVertexBuffer::new(device, "Background Vertex Buffer", 0);
        let glyph_vertices = QuadVertexBuffer::new(device, "Glyph Vertex Buffer", 0);
        let index_buffer = create_index_buffer(device, 1);

        Ok(Self {
            ctx,
            width,
            height,
            texture,
            view,
            uniform_buffer,
            uniform_bind_group,
            atlas_layout,
            sampler,
            atlas_binding: None,
            flat_pipeline,
            textured_pipeline,
            background_vertices,
            glyph_vertices,
            index_buffer,
            index_quads: 1,
        })
    }

    fn ensure_indices(&mut self, quads: usize) {
        if quads > self.index_quads {
            self.index_buffer = create_index_buffer(&self.ctx.device, quads);
            self.index_quads = quads;
        }
    }

    fn bind_atlas(&mut self, atlas: &GlyphAtlas) {
        if matches!(&self.atlas_binding, Some((id, _, _)) if *id == atlas.id()) {
            return;
        }

        let device = &self.ctx.device;
        let (width, height) = atlas.texture_size();
        let size = wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Glyph Atlas"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        if width > 0 && height > 0 {
            self.ctx.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                atlas.texture().as_raw(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                size,
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Atlas Bind Group"),
            layout: &self.atlas_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        tracing::debug!("Uploaded atlas {} ({}x{}) to GPU", atlas.id(), width, height);
        let atlas_size = [size.width as f32, size.height as f32];
        self.atlas_binding = Some((atlas.id(), atlas_size, bind_group));
    }

    fn write_uniforms(&self, atlas_size: [f32; 2]) {
        self.ctx.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::cast_slice(&[Uniforms {
                target_size: [self.width.max(1) as f32, self.height.max(1) as f32],
                atlas_size,
            }]),
        );
    }

    fn submit_pass(&self, load: wgpu::LoadOp<wgpu::Color>, draw: Option<(Layer, u32)>) {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Grid Encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Grid Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some((layer, num_indices)) = draw {
                match layer {
                    Layer::Background => {
                        render_pass.set_pipeline(&self.flat_pipeline);
                        render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                        render_pass.set_vertex_buffer(0, self.background_vertices.buffer.slice(..));
                    }
                    Layer::Glyph => {
                        render_pass.set_pipeline(&self.textured_pipeline);
                        render_pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                        if let Some((_, _, bind_group)) = &self.atlas_binding {
                            render_pass.set_bind_group(1, bind_group, &[]);
                        }
                        render_pass.set_vertex_buffer(0, self.glyph_vertices.buffer.slice(..));
                    }
                }
                render_pass
                    .set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..num_indices, 0, 0..1);
            }
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }
}

#[derive(Clone, Copy)]
enum Layer {
    Background,
    Glyph,
}

impl RenderTarget for GpuTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self, color: Color) {
        let clear = wgpu::Color {
            r: color.r as f64,
            g: color.g as f64,
            b: color.b as f64,
            a: color.a as f64,
        };
        self.submit_pass(wgpu::LoadOp::Clear(clear), None);
    }

    fn draw_flat(&mut self, vertices: &[Vertex]) {
        let quads = vertices.len() / 4;
        if quads == 0 {
            return;
        }
        let vertices = &vertices[..quads * 4];
        self.ensure_indices(quads);
        self.background_vertices
            .write(&self.ctx.device, &self.ctx.queue, vertices);
        let atlas_size = self.atlas_binding.as_ref().map_or([1.0, 1.0], |(_, size, _)| *size);
        self.write_uniforms(atlas_size);
        self.submit_pass(wgpu::LoadOp::Load, Some((Layer::Background, (quads * 6) as u32)));
    }

    fn draw_textured(&mut self, vertices: &[Vertex], atlas: &GlyphAtlas) {
        let quads = vertices.len() / 4;
        if quads == 0 {
            return;
        }
        let vertices = &vertices[..quads * 4];
        self.bind_atlas(atlas);
        self.ensure_indices(quads);
        self.glyph_vertices.write(&self.ctx.device, &self.ctx.queue, vertices);
        let atlas_size = self.atlas_binding.as_ref().map_or([1.0, 1.0], |(_, size, _)| *size);
        self.write_uniforms(atlas_size);
        self.submit_pass(wgpu::LoadOp::Load, Some((Layer::Glyph, (quads * 6) as u32)));
    }

    fn display(&mut self) -> Result<(), RenderError> {
        let _ = self.ctx.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_pixels(&self) -> Result<RgbaImage, RenderError> {
        if self.width == 0 || self.height == 0 {
            return Ok(RgbaImage::new(self.width, self.height));
        }

        let device = &self.ctx.device;
        let unpadded = 4 * self.width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * self.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(|_| RenderError::ReadbackLost)??;

        let mut pixels = Vec::with_capacity((unpadded * self.height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        staging.unmap();

        RgbaImage::from_raw(self.width, self.height, pixels).ok_or(RenderError::ReadbackLost)
    }
}

fn create_pipeline(
    device: &Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    label: &str,
    fragment_entry: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::desc()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Two triangles per quad: (0, 1, 2) and (0, 2, 3)
fn quad_indices(quads: usize) -> Vec<u32> {
    (0..quads as u32)
        .flat_map(|q| {
            let base = q * 4;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect()
}

fn create_index_buffer(device: &Device, quads: usize) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Quad Index Buffer"),
        contents: bytemuck::cast_slice(&quad_indices(quads.max(1))),
        usage: wgpu::BufferUsages::INDEX,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::{quad_corners, QuadBuffer};

    #[test]
    fn quad_indices_split_each_quad_into_two_triangles() {
        assert_eq!(quad_indices(2), vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
    }

    // Skips quietly on machines without any adapter (CI containers)
    #[test]
    fn gpu_target_clears_and_draws_when_adapter_present() {
        let Ok(ctx) = GpuContext::new_blocking() else {
            return;
        };
        let mut target = GpuTarget::new(Arc::new(ctx), 8, 4).unwrap();
        target.clear(Color::BLUE);

        let mut buf = QuadBuffer::with_quad_capacity(1);
        buf.push_quad(quad_corners(0.0, 0.0, 4.0, 4.0), [[0.0; 2]; 4], Color::RED);
        target.draw_flat(buf.used());
        target.display().unwrap();

        let pixels = target.read_pixels().unwrap();
        assert_eq!(pixels.dimensions(), (8, 4));
        assert_eq!(pixels.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(pixels.get_pixel(6, 2).0, [0, 0, 255, 255]);
    }

    #[test]
    fn gpu_target_rejects_sizes_over_the_device_limit() {
        let Ok(ctx) = GpuContext::new_blocking() else {
            return;
        };
        let max = ctx.device.limits().max_texture_dimension_2d;
        let ctx = Arc::new(ctx);

        let err = GpuTarget::new(ctx.clone(), max + 1, 16).err().unwrap();
        match err {
            GpuError::TargetTooLarge { width, height, max: limit } => {
                assert_eq!((width, height, limit), (max + 1, 16, max));
            }
            other => panic!("expected TargetTooLarge, got {:?}", other),
        }
        assert!(GpuTarget::new(ctx.clone(), 16, max + 1).is_err());
        assert!(GpuTarget::new(ctx, 16, 16).is_ok());
    }
}
