//! Headless `wgpu` implementation of [`GpuDevice`].
//!
//! The presentation target is an offscreen RGBA8 texture that can be read back
//! with [`WgpuDevice::read_back_buffer`]. Each draw is encoded and submitted on
//! its own, so the order of parameter writes always matches the order of draws.

mod compile;
mod context;
mod pipeline;
mod textures;

use std::collections::BTreeMap;

use anyhow::{anyhow, Context as _};
use wgpu::util::DeviceExt;

use crate::device::{GpuDevice, RenderTarget, TextureDesc, Vertex};
use crate::error::DeviceError;
use crate::program::ProgramDesc;
use crate::types::{Filter, Frame, SamplerSpec, Size, TexelFormat, Viewport, WrapMode};

use self::context::GpuContext;
use self::pipeline::PipelineHandles;
use self::textures::{encode_clear, read_rgba8, SamplerCache};

pub use self::context::ContextOptions;
pub use self::pipeline::WgpuProgram;
pub use self::textures::GpuTexture;

/// A pass's vertex buffer.
#[derive(Debug)]
pub struct GpuVertexBuffer {
    buffer: wgpu::Buffer,
}

const BACK_BUFFER_FORMAT: TexelFormat = TexelFormat::Rgba8;

const DEFAULT_SAMPLER: SamplerSpec = SamplerSpec {
    filter: Filter::Nearest,
    wrap: WrapMode::ClampToEdge,
};

enum Target {
    BackBuffer,
    Texture {
        view: wgpu::TextureView,
        size: Size,
    },
}

struct BoundProgram {
    handles: PipelineHandles,
    uniforms: Vec<u8>,
}

pub struct WgpuDevice {
    options: ContextOptions,
    context: GpuContext,
    back_buffer: GpuTexture,
    placeholder: GpuTexture,
    samplers: SamplerCache,
    target: Target,
    viewport: Option<Viewport>,
    program: Option<BoundProgram>,
    textures: BTreeMap<u32, (wgpu::TextureView, SamplerSpec)>,
    streams: BTreeMap<u32, wgpu::Buffer>,
    frames_presented: u64,
}

impl WgpuDevice {
    pub fn new(back_buffer: Size, options: ContextOptions) -> anyhow::Result<Self> {
        let context = GpuContext::new(options)?;
        let (back_buffer, placeholder) = Self::create_fixed_textures(&context, back_buffer)?;
        let samplers = SamplerCache::new(context.features);
        Ok(Self {
            options,
            context,
            back_buffer,
            placeholder,
            samplers,
            target: Target::BackBuffer,
            viewport: None,
            program: None,
            textures: BTreeMap::new(),
            streams: BTreeMap::new(),
            frames_presented: 0,
        })
    }

    fn create_fixed_textures(
        context: &GpuContext,
        back_buffer: Size,
    ) -> anyhow::Result<(GpuTexture, GpuTexture)> {
        let back_buffer = GpuTexture::new(&context.device, "back buffer", back_buffer, BACK_BUFFER_FORMAT)
            .context("failed to allocate back buffer")?;
        let placeholder = GpuTexture::new(&context.device, "unbound input", Size::new(1, 1), TexelFormat::Rgba8)
            .context("failed to allocate placeholder texture")?;
        placeholder.upload(&context.queue, &Frame::new(&[0, 0, 0, 0xff], 1, 1, 4))?;
        Ok((back_buffer, placeholder))
    }

    /// Reads the presentation target back to the CPU.
    pub fn read_back_buffer(&self) -> anyhow::Result<image::RgbaImage> {
        let size = self.back_buffer.size();
        let pixels = read_rgba8(&self.context.device, &self.context.queue, &self.back_buffer)?;
        image::RgbaImage::from_raw(size.width, size.height, pixels)
            .ok_or_else(|| anyhow!("readback of {size} returned a short buffer"))
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.context.is_lost() {
            Err(DeviceError::Lost)
        } else {
            Ok(())
        }
    }

    fn clear_bindings(&mut self) {
        self.target = Target::BackBuffer;
        self.viewport = None;
        self.program = None;
        self.textures.clear();
        self.streams.clear();
    }

    fn submit_clear(&self, view: &wgpu::TextureView, color: wgpu::Color) -> Result<(), DeviceError> {
        self.check_lost()?;
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear encoder"),
            });
        encode_clear(&mut encoder, view, color);
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn target_view_and_size(&self) -> (wgpu::TextureView, Size) {
        match &self.target {
            Target::BackBuffer => (self.back_buffer.view.clone(), self.back_buffer.size()),
            Target::Texture { view, size } => (view.clone(), *size),
        }
    }

    fn texture_bind_group(&mut self, handles: &PipelineHandles) -> wgpu::BindGroup {
        let mut views = Vec::with_capacity(handles.textures.len());
        for &binding in &handles.textures {
            let view = match self.textures.get(&binding) {
                Some((view, _)) => view.clone(),
                None => self.placeholder.view.clone(),
            };
            views.push((binding, view));
        }
        let mut samplers = Vec::with_capacity(handles.samplers.len());
        for &(binding, paired) in &handles.samplers {
            let spec = paired
                .and_then(|texture| self.textures.get(&texture))
                .map_or(DEFAULT_SAMPLER, |(_, spec)| *spec);
            samplers.push((binding, self.samplers.get(&self.context.device, spec)));
        }

        let mut entries = Vec::with_capacity(views.len() + samplers.len());
        for (binding, view) in &views {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        for (binding, sampler) in &samplers {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        self.context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pass texture bind group"),
            layout: &handles.texture_layout,
            entries: &entries,
        })
    }
}

/// Intersects `viewport` with a target of `size`.
fn clamp_viewport(viewport: Viewport, size: Size) -> Option<(f32, f32, f32, f32)> {
    let x0 = viewport.x.min(size.width);
    let y0 = viewport.y.min(size.height);
    let x1 = viewport.x.saturating_add(viewport.width).min(size.width);
    let y1 = viewport.y.saturating_add(viewport.height).min(size.height);
    (x1 > x0 && y1 > y0).then(|| (x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32))
}

impl GpuDevice for WgpuDevice {
    type Texture = GpuTexture;
    type VertexBuffer = GpuVertexBuffer;
    type Program = WgpuProgram;

    fn back_buffer_format(&self) -> TexelFormat {
        BACK_BUFFER_FORMAT
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<GpuTexture, DeviceError> {
        self.check_lost()?;
        GpuTexture::new(&self.context.device, desc.label, desc.size, desc.format)
    }

    fn upload_texture(&mut self, texture: &GpuTexture, frame: &Frame<'_>) -> Result<(), DeviceError> {
        self.check_lost()?;
        texture.upload(&self.context.queue, frame)
    }

    fn clear_texture(&mut self, texture: &GpuTexture) -> Result<(), DeviceError> {
        self.submit_clear(&texture.view, wgpu::Color::TRANSPARENT)
    }

    fn create_vertex_buffer(&mut self, label: &str) -> Result<GpuVertexBuffer, DeviceError> {
        self.check_lost()?;
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: Vertex::STRIDE * 4,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(GpuVertexBuffer { buffer })
    }

    fn write_vertices(&mut self, buffer: &GpuVertexBuffer, vertices: &[Vertex; 4]) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.context
            .queue
            .write_buffer(&buffer.buffer, 0, bytemuck::cast_slice(vertices));
        Ok(())
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<WgpuProgram, DeviceError> {
        self.check_lost()?;
        WgpuProgram::compile(&self.context.device, desc)
    }

    fn set_render_target(&mut self, target: RenderTarget<'_, GpuTexture>) {
        self.target = match target {
            RenderTarget::BackBuffer => Target::BackBuffer,
            RenderTarget::Texture(texture) => Target::Texture {
                view: texture.view.clone(),
                size: texture.size(),
            },
        };
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
    }

    fn clear_back_buffer(&mut self) -> Result<(), DeviceError> {
        self.submit_clear(&self.back_buffer.view, wgpu::Color::BLACK)
    }

    fn bind_program(&mut self, program: &WgpuProgram) {
        self.program = Some(BoundProgram {
            handles: program.handles.clone(),
            uniforms: program.uniform_data().to_vec(),
        });
    }

    fn bind_texture(&mut self, slot: u32, texture: &GpuTexture, sampler: SamplerSpec) {
        self.textures.insert(slot, (texture.view.clone(), sampler));
    }

    fn unbind_texture(&mut self, slot: u32) {
        self.textures.remove(&slot);
    }

    fn bind_vertex_stream(&mut self, stream: u32, buffer: &GpuVertexBuffer) {
        self.streams.insert(stream, buffer.buffer.clone());
    }

    fn unbind_vertex_stream(&mut self, stream: u32) {
        self.streams.remove(&stream);
    }

    fn draw_quad(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        let Some(bound) = self.program.as_ref() else {
            return Err(DeviceError::Other(anyhow!("draw without a bound program")));
        };
        let handles = bound.handles.clone();
        let uniforms = bound.uniforms.clone();

        let Some(primary) = self.streams.get(&0).cloned() else {
            return Err(DeviceError::Other(anyhow!(
                "draw of '{}' without a vertex buffer",
                handles.label
            )));
        };
        let (view, target_size) = self.target_view_and_size();
        let viewport = self
            .viewport
            .unwrap_or_else(|| Viewport::from_size(target_size));
        let Some((x, y, width, height)) = clamp_viewport(viewport, target_size) else {
            tracing::trace!(program = %handles.label, "skipping draw with empty viewport");
            return Ok(());
        };

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture_group = self.texture_bind_group(&handles);
        let device = &self.context.device;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pass encoder"),
        });
        if let Some(buffer) = handles.uniform_buffer.as_ref() {
            let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("uniform staging"),
                contents: &uniforms,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
            encoder.copy_buffer_to_buffer(&staging, 0, buffer, 0, uniforms.len() as u64);
        }
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pass render"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_pipeline(&handles.pipeline);
            render_pass.set_bind_group(0, &handles.uniform_bind_group, &[]);
            render_pass.set_bind_group(1, &texture_group, &[]);
            for stream in 0..handles.stream_count {
                let buffer = self.streams.get(&stream).unwrap_or(&primary);
                render_pass.set_vertex_buffer(stream, buffer.slice(..));
            }
            render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
            render_pass.draw(0..4, 0..1);
        }
        self.context.queue.submit(Some(encoder.finish()));

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(DeviceError::Other(anyhow!(
                "draw of '{}' failed: {error}",
                handles.label
            )));
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.context.wait_idle();
        self.check_lost()?;
        self.frames_presented += 1;
        tracing::trace!(frame = self.frames_presented, "presented back buffer");
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.context.is_lost()
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.clear_bindings();
        self.check_lost()?;
        self.context.wait_idle();
        Ok(())
    }

    fn recreate(&mut self) -> Result<(), DeviceError> {
        self.clear_bindings();
        let size = self.back_buffer.size();
        let context = GpuContext::new(self.options)?;
        let (back_buffer, placeholder) = Self::create_fixed_textures(&context, size)?;
        self.samplers = SamplerCache::new(context.features);
        self.back_buffer = back_buffer;
        self.placeholder = placeholder;
        self.context = context;
        tracing::info!("recreated GPU device");
        Ok(())
    }
}
