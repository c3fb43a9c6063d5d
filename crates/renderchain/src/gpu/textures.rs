use std::collections::HashMap;

use anyhow::anyhow;

use crate::error::DeviceError;
use crate::pixels::expand_rgb565;
use crate::types::{Filter, Frame, SamplerSpec, Size, TexelFormat, WrapMode};

/// wgpu format backing a texel layout. RGB565 frames are expanded on upload.
pub(crate) fn texture_format(format: TexelFormat) -> wgpu::TextureFormat {
    match format {
        TexelFormat::Rgb565 | TexelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TexelFormat::Xrgb8888 => wgpu::TextureFormat::Bgra8Unorm,
        TexelFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TexelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// A texture and its default view.
#[derive(Debug)]
pub struct GpuTexture {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    size: Size,
    format: TexelFormat,
}

impl GpuTexture {
    pub(crate) fn new(
        device: &wgpu::Device,
        label: &str,
        size: Size,
        format: TexelFormat,
    ) -> Result<Self, DeviceError> {
        let max = device.limits().max_texture_dimension_2d;
        if size.width == 0 || size.height == 0 || size.width > max || size.height > max {
            return Err(DeviceError::Unsupported(format!(
                "texture '{label}' of {size} exceeds the device limit of {max}x{max}"
            )));
        }

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if pollster::block_on(device.pop_error_scope()).is_some() {
            return Err(DeviceError::OutOfMemory);
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            size,
            format,
        })
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> TexelFormat {
        self.format
    }

    pub(crate) fn upload(&self, queue: &wgpu::Queue, frame: &Frame<'_>) -> Result<(), DeviceError> {
        if frame.width > self.size.width || frame.height > self.size.height {
            return Err(DeviceError::Other(anyhow!(
                "frame of {} does not fit texture of {}",
                frame.size(),
                self.size
            )));
        }
        if frame.width == 0 || frame.height == 0 {
            return Ok(());
        }

        let expanded;
        let (data, bytes_per_row) = match self.format {
            TexelFormat::Rgb565 => {
                expanded = expand_rgb565(frame);
                (expanded.as_slice(), frame.width * 4)
            }
            _ => (frame.data, frame.pitch as u32),
        };

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

/// Records a render pass that clears `view` to `color`.
pub(crate) fn encode_clear(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, color: wgpu::Color) {
    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("clear pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(color),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        occlusion_query_set: None,
        timestamp_writes: None,
    });
}

/// Samplers keyed by filter and wrap.
pub(crate) struct SamplerCache {
    samplers: HashMap<SamplerSpec, wgpu::Sampler>,
    border_supported: bool,
}

impl SamplerCache {
    pub(crate) fn new(features: wgpu::Features) -> Self {
        Self {
            samplers: HashMap::new(),
            border_supported: features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER),
        }
    }

    pub(crate) fn get(&mut self, device: &wgpu::Device, spec: SamplerSpec) -> wgpu::Sampler {
        let border_supported = self.border_supported;
        self.samplers
            .entry(spec)
            .or_insert_with(|| create_sampler(device, spec, border_supported))
            .clone()
    }
}

fn create_sampler(device: &wgpu::Device, spec: SamplerSpec, border_supported: bool) -> wgpu::Sampler {
    let filter = match spec.filter {
        Filter::Linear => wgpu::FilterMode::Linear,
        Filter::Nearest => wgpu::FilterMode::Nearest,
    };
    let (address_mode, border_color) = match spec.wrap {
        WrapMode::ClampToBorder if border_supported => (
            wgpu::AddressMode::ClampToBorder,
            Some(wgpu::SamplerBorderColor::TransparentBlack),
        ),
        WrapMode::ClampToBorder | WrapMode::ClampToEdge => (wgpu::AddressMode::ClampToEdge, None),
        WrapMode::Repeat => (wgpu::AddressMode::Repeat, None),
        WrapMode::MirroredRepeat => (wgpu::AddressMode::MirrorRepeat, None),
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("pass sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        border_color,
        ..Default::default()
    })
}

/// Copies `texture` into tightly packed RGBA8 rows.
pub(crate) fn read_rgba8(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &GpuTexture,
) -> anyhow::Result<Vec<u8>> {
    let Size { width, height } = texture.size();
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = unpadded.div_ceil(align) * align;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback buffer"),
        size: u64::from(padded) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &texture.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|err| anyhow!("failed to wait for readback: {err}"))?;
    receiver
        .recv()
        .map_err(|_| anyhow!("readback mapping was dropped"))?
        .map_err(|err| anyhow!("failed to map readback buffer: {err}"))?;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded * height) as usize);
    for row in mapped.chunks(padded as usize).take(height as usize) {
        pixels.extend_from_slice(&row[..unpadded as usize]);
    }
    drop(mapped);
    buffer.unmap();

    if texture.format() == TexelFormat::Xrgb8888 {
        crate::pixels::bgra_to_rgba_in_place(&mut pixels);
    }
    Ok(pixels)
}
