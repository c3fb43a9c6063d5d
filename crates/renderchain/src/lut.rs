use std::collections::HashSet;

use tracing::debug;

use crate::device::{GpuDevice, TextureDesc};
use crate::error::ChainError;
use crate::types::{Filter, Frame, LutSpec, SamplerSpec, Size, TexelFormat, MAX_LUTS};

pub(crate) struct LutEntry<D: GpuDevice> {
    pub name: String,
    pub texture: D::Texture,
    pub sampler: SamplerSpec,
}

/// Lookup textures decoded once at construction and read-only afterwards.
pub(crate) struct LutTable<D: GpuDevice> {
    entries: Vec<LutEntry<D>>,
}

impl<D: GpuDevice> LutTable<D> {
    pub fn load(device: &mut D, specs: &[LutSpec]) -> Result<Self, ChainError> {
        if specs.len() > MAX_LUTS {
            return Err(ChainError::TooManyLuts {
                count: specs.len(),
                max: MAX_LUTS,
            });
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(ChainError::DuplicateLut(spec.name.clone()));
            }
            entries.push(load_entry(device, spec)?);
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &LutEntry<D>> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&LutEntry<D>> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn load_entry<D: GpuDevice>(device: &mut D, spec: &LutSpec) -> Result<LutEntry<D>, ChainError> {
    let image = image::open(&spec.path)
        .map_err(|source| ChainError::Lut {
            name: spec.name.clone(),
            path: spec.path.clone(),
            source,
        })?
        .to_rgba8();
    let size = Size::new(image.width(), image.height());
    let label = format!("lut {}", spec.name);
    let texture = device.create_texture(&TextureDesc {
        label: &label,
        size,
        format: TexelFormat::Rgba8,
    })?;
    let pitch = size.width as usize * 4;
    device.upload_texture(
        &texture,
        &Frame::new(image.as_raw(), size.width, size.height, pitch),
    )?;
    debug!(lut = %spec.name, width = size.width, height = size.height, "loaded lookup texture");

    Ok(LutEntry {
        name: spec.name.clone(),
        texture,
        sampler: SamplerSpec {
            filter: if spec.smooth {
                Filter::Linear
            } else {
                Filter::Nearest
            },
            wrap: spec.wrap,
        },
    })
}
