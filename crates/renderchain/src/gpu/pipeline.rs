use std::borrow::Cow;
use std::collections::BTreeMap;

use wgpu::naga::ShaderStage;

use crate::device::Vertex;
use crate::error::DeviceError;
use crate::program::{
    logical_texture_name, shader_identifier, ProgramDesc, ShaderCode, ShaderProgram, UniformValue,
};

use super::compile::{
    parse_stage, sampler_identifier, stage_define, Reflection, UniformKind, STOCK_PROGRAM_GLSL,
};
use super::textures::texture_format;

/// Attributes read from the pass's own vertex buffer, with their byte offsets.
const CORE_ATTRIBUTES: [(&str, u64); 4] = [
    ("position", 0),
    ("tex_coord", Vertex::TEX_COORD_OFFSET),
    ("lut_tex_coord", Vertex::LUT_TEX_COORD_OFFSET),
    ("color", Vertex::COLOR_OFFSET),
];

/// GPU objects needed to draw with a program.
#[derive(Clone)]
pub(crate) struct PipelineHandles {
    pub label: String,
    pub pipeline: wgpu::RenderPipeline,
    pub texture_layout: wgpu::BindGroupLayout,
    pub uniform_buffer: Option<wgpu::Buffer>,
    pub uniform_bind_group: wgpu::BindGroup,
    /// Texture bindings of group 1.
    pub textures: Vec<u32>,
    /// Sampler bindings of group 1 with the texture binding each one pairs with.
    pub samplers: Vec<(u32, Option<u32>)>,
    pub stream_count: u32,
    pub target: wgpu::TextureFormat,
}

/// A compiled pass program.
pub struct WgpuProgram {
    pub(crate) handles: PipelineHandles,
    reflection: Reflection,
    streams: BTreeMap<String, u32>,
    uniform_data: Vec<u8>,
}

impl WgpuProgram {
    pub(crate) fn compile(
        device: &wgpu::Device,
        desc: &ProgramDesc<'_>,
    ) -> Result<Self, DeviceError> {
        let label = desc.label.to_string();
        let source = match desc.code {
            ShaderCode::Stock => STOCK_PROGRAM_GLSL,
            ShaderCode::Text { source, .. } => source,
        };
        let compile_error = |message: String| DeviceError::Compile {
            label: label.clone(),
            message,
        };

        let vertex = parse_stage(source, ShaderStage::Vertex).map_err(compile_error)?;
        let fragment = parse_stage(source, ShaderStage::Fragment).map_err(compile_error)?;
        let reflection = Reflection::from_modules(&label, &vertex, &fragment).map_err(compile_error)?;
        let streams = assign_streams(&reflection).map_err(compile_error)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let handles = build_pipeline(device, desc, source, &reflection, &streams);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(compile_error(error.to_string()));
        }

        tracing::debug!(
            program = %label,
            textures = reflection.textures.len(),
            uniforms = reflection.uniforms.len(),
            streams = handles.stream_count,
            "compiled pass program"
        );

        let uniform_data = vec![0; reflection.uniform_size as usize];
        Ok(Self {
            handles,
            reflection,
            streams,
            uniform_data,
        })
    }

    pub(crate) fn uniform_data(&self) -> &[u8] {
        &self.uniform_data
    }
}

impl ShaderProgram for WgpuProgram {
    fn set_parameter(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(slot) = self.reflection.uniforms.get(&shader_identifier(name)).copied() else {
            return false;
        };
        let bytes: Vec<u8> = match (slot.kind, value) {
            (UniformKind::Float, UniformValue::Float(v)) => v.to_ne_bytes().to_vec(),
            (UniformKind::Vec2, UniformValue::Vec2(v)) => bytemuck::cast_slice(&v).to_vec(),
            (UniformKind::Vec4, UniformValue::Vec2(v)) => bytemuck::cast_slice(&[v[0], v[1], 0.0, 0.0]).to_vec(),
            (UniformKind::Mat4, UniformValue::Mat4(m)) => bytemuck::cast_slice(&m).to_vec(),
            (kind, value) => {
                tracing::debug!(parameter = name, ?kind, ?value, "parameter type mismatch");
                return false;
            }
        };
        let start = slot.offset as usize;
        let end = start + slot.kind.byte_len().min(bytes.len());
        match self.uniform_data.get_mut(start..end) {
            Some(dst) => {
                dst.copy_from_slice(&bytes[..end - start]);
                true
            }
            None => false,
        }
    }

    fn sampler_slot(&self, name: &str) -> Option<u32> {
        self.reflection.textures.get(&shader_identifier(name)).copied()
    }

    fn attribute_stream(&self, name: &str) -> Option<u32> {
        self.streams.get(&shader_identifier(name)).copied()
    }

    fn declared_inputs(&self) -> Vec<String> {
        self.reflection
            .textures
            .keys()
            .map(|identifier| logical_texture_name(identifier))
            .collect()
    }
}

/// Gives every non-core `<PREFIX>_tex_coord` attribute its own stream after stream 0.
fn assign_streams(reflection: &Reflection) -> Result<BTreeMap<String, u32>, String> {
    let mut streams = BTreeMap::new();
    let mut next = 1;
    for name in reflection.vertex_inputs.keys() {
        if CORE_ATTRIBUTES.iter().any(|(core, _)| core == name) {
            continue;
        }
        if !name.ends_with("_tex_coord") {
            return Err(format!("unknown vertex input '{name}'"));
        }
        streams.insert(name.clone(), next);
        next += 1;
    }
    Ok(streams)
}

fn build_pipeline(
    device: &wgpu::Device,
    desc: &ProgramDesc<'_>,
    source: &str,
    reflection: &Reflection,
    streams: &BTreeMap<String, u32>,
) -> PipelineHandles {
    let module = |stage: ShaderStage| {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage,
                defines: &[(stage_define(stage), "1")],
            },
        })
    };
    let vertex_module = module(ShaderStage::Vertex);
    let fragment_module = module(ShaderStage::Fragment);

    let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = if reflection.uniform_size > 0 {
        vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }]
    } else {
        Vec::new()
    };
    let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("pass uniform layout"),
        entries: &uniform_entries,
    });
    let uniform_buffer = (reflection.uniform_size > 0).then(|| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pass uniforms"),
            size: reflection.uniform_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    });
    let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("pass uniform bind group"),
        layout: &uniform_layout,
        entries: &uniform_buffer
            .iter()
            .map(|buffer| wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            })
            .collect::<Vec<_>>(),
    });

    let mut texture_entries = Vec::new();
    for &binding in reflection.textures.values() {
        texture_entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    let mut samplers = Vec::new();
    for (identifier, &binding) in &reflection.samplers {
        let paired = reflection
            .textures
            .iter()
            .find(|(texture, _)| sampler_identifier(texture) == *identifier)
            .map(|(_, &texture_binding)| texture_binding);
        samplers.push((binding, paired));
        texture_entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("pass texture layout"),
        entries: &texture_entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("pass pipeline layout"),
        bind_group_layouts: &[&uniform_layout, &texture_layout],
        push_constant_ranges: &[],
    });

    let mut stream_attributes: Vec<Vec<wgpu::VertexAttribute>> = vec![Vec::new(); streams.len() + 1];
    for (name, input) in &reflection.vertex_inputs {
        let (stream, offset) = match CORE_ATTRIBUTES.iter().find(|(core, _)| core == name) {
            Some(&(_, offset)) => (0, offset),
            None => match streams.get(name) {
                Some(&stream) => (stream as usize, Vertex::TEX_COORD_OFFSET),
                None => continue,
            },
        };
        stream_attributes[stream].push(wgpu::VertexAttribute {
            format: input.format,
            offset,
            shader_location: input.location,
        });
    }
    let buffers: Vec<wgpu::VertexBufferLayout> = stream_attributes
        .iter()
        .map(|attributes| wgpu::VertexBufferLayout {
            array_stride: Vertex::STRIDE,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        })
        .collect();

    let target = texture_format(desc.target);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &vertex_module,
            entry_point: Some("main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &fragment_module,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    });

    PipelineHandles {
        label: desc.label.to_string(),
        pipeline,
        texture_layout,
        uniform_buffer,
        uniform_bind_group,
        textures: reflection.textures.values().copied().collect(),
        samplers,
        stream_count: stream_attributes.len() as u32,
        target,
    }
}
