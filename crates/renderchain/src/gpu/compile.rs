use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use wgpu::naga::{self, front::glsl, AddressSpace, ShaderStage, TypeInner, VectorSize};

use crate::parameters::is_parameter_pragma;

/// Preprocessor symbol defined while compiling the vertex half of a pass.
pub(crate) const VERTEX_DEFINE: &str = "VERTEX";
/// Preprocessor symbol defined while compiling the fragment half of a pass.
pub(crate) const FRAGMENT_DEFINE: &str = "FRAGMENT";

/// Bind group holding the parameter block.
pub(crate) const UNIFORM_GROUP: u32 = 0;
/// Bind group holding textures and samplers.
pub(crate) const TEXTURE_GROUP: u32 = 1;

/// Built-in pass-through program.
///
/// Pass shaders are single GLSL files compiled twice, once with `VERTEX` and once
/// with `FRAGMENT` defined. Parameters live in one std140 block at set 0, binding
/// 0, with dots in logical names replaced by underscores (`IN.video_size` becomes
/// `IN_video_size`). Textures are `texture2D` globals in set 1 with a matching
/// `<name>_sampler`. Vertex inputs are `position`, `tex_coord`, `lut_tex_coord`,
/// `color`, and `<PREFIX>_tex_coord` for other inputs' coordinates.
pub(crate) const STOCK_PROGRAM_GLSL: &str = r"#version 450

layout(std140, set = 0, binding = 0) uniform ChainParams {
    mat4 modelViewProj;
} params;

#ifdef VERTEX
layout(location = 0) in vec4 position;
layout(location = 1) in vec2 tex_coord;
layout(location = 0) out vec2 v_tex_coord;

void main() {
    gl_Position = params.modelViewProj * position;
    v_tex_coord = tex_coord;
}
#endif

#ifdef FRAGMENT
layout(location = 0) in vec2 v_tex_coord;
layout(location = 0) out vec4 out_color;

layout(set = 1, binding = 0) uniform texture2D IN_texture;
layout(set = 1, binding = 1) uniform sampler IN_texture_sampler;

void main() {
    out_color = texture(sampler2D(IN_texture, IN_texture_sampler), v_tex_coord);
}
#endif
";

/// Shape of a reflected parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UniformKind {
    Float,
    Vec2,
    Vec4,
    Mat4,
}

impl UniformKind {
    pub(crate) fn byte_len(self) -> usize {
        match self {
            UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct UniformSlot {
    pub offset: u32,
    pub kind: UniformKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VertexInput {
    pub location: u32,
    pub format: wgpu::VertexFormat,
}

/// Names and bindings reflected from both stages of a program.
#[derive(Debug, Clone, Default)]
pub(crate) struct Reflection {
    /// Size of the parameter block; zero when the program declares none.
    pub uniform_size: u64,
    pub uniforms: HashMap<String, UniformSlot>,
    /// Texture binding per shader identifier.
    pub textures: BTreeMap<String, u32>,
    /// Sampler binding per shader identifier.
    pub samplers: BTreeMap<String, u32>,
    pub vertex_inputs: BTreeMap<String, VertexInput>,
}

impl Reflection {
    pub(crate) fn from_modules(label: &str, vertex: &naga::Module, fragment: &naga::Module) -> Result<Self, String> {
        let mut reflection = Reflection::default();
        reflection.collect_globals(label, vertex)?;
        reflection.collect_globals(label, fragment)?;
        reflection.collect_vertex_inputs(vertex)?;
        Ok(reflection)
    }

    fn collect_globals(&mut self, label: &str, module: &naga::Module) -> Result<(), String> {
        for (_, global) in module.global_variables.iter() {
            let Some(name) = global.name.as_deref() else {
                continue;
            };
            let inner = &module.types[global.ty].inner;
            match (global.space, inner) {
                (AddressSpace::Uniform, TypeInner::Struct { members, span }) => {
                    expect_binding(label, name, global.binding.as_ref(), UNIFORM_GROUP, Some(0))?;
                    self.uniform_size = self.uniform_size.max(u64::from(*span));
                    for member in members {
                        let Some(member_name) = member.name.as_deref() else {
                            continue;
                        };
                        if let Some(kind) = uniform_kind(&module.types[member.ty].inner) {
                            self.uniforms.insert(
                                member_name.to_string(),
                                UniformSlot {
                                    offset: member.offset,
                                    kind,
                                },
                            );
                        }
                    }
                }
                (_, TypeInner::Image { .. }) => {
                    let binding = expect_binding(label, name, global.binding.as_ref(), TEXTURE_GROUP, None)?;
                    self.textures.insert(name.to_string(), binding);
                }
                (_, TypeInner::Sampler { .. }) => {
                    let binding = expect_binding(label, name, global.binding.as_ref(), TEXTURE_GROUP, None)?;
                    self.samplers.insert(name.to_string(), binding);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_vertex_inputs(&mut self, module: &naga::Module) -> Result<(), String> {
        let Some(entry) = module
            .entry_points
            .iter()
            .find(|entry| entry.stage == ShaderStage::Vertex)
        else {
            return Err("vertex stage has no entry point".to_string());
        };
        for argument in &entry.function.arguments {
            let Some(naga::Binding::Location { location, .. }) = argument.binding else {
                continue;
            };
            let Some(name) = argument.name.as_deref() else {
                return Err(format!("vertex input at location {location} has no name"));
            };
            let format = match &module.types[argument.ty].inner {
                TypeInner::Scalar(_) => wgpu::VertexFormat::Float32,
                TypeInner::Vector { size: VectorSize::Bi, .. } => wgpu::VertexFormat::Float32x2,
                TypeInner::Vector { size: VectorSize::Tri, .. } => wgpu::VertexFormat::Float32x3,
                TypeInner::Vector { size: VectorSize::Quad, .. } => wgpu::VertexFormat::Float32x4,
                other => return Err(format!("vertex input '{name}' has unsupported type {other:?}")),
            };
            self.vertex_inputs
                .insert(name.to_string(), VertexInput { location, format });
        }
        Ok(())
    }
}

fn uniform_kind(inner: &TypeInner) -> Option<UniformKind> {
    match inner {
        TypeInner::Scalar(scalar) if scalar.kind == naga::ScalarKind::Float => Some(UniformKind::Float),
        TypeInner::Vector {
            size: VectorSize::Bi,
            ..
        } => Some(UniformKind::Vec2),
        TypeInner::Vector {
            size: VectorSize::Quad,
            ..
        } => Some(UniformKind::Vec4),
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            ..
        } => Some(UniformKind::Mat4),
        _ => None,
    }
}

fn expect_binding(
    label: &str,
    name: &str,
    binding: Option<&naga::ResourceBinding>,
    group: u32,
    index: Option<u32>,
) -> Result<u32, String> {
    match binding {
        Some(found) if found.group == group && index.map_or(true, |index| index == found.binding) => {
            Ok(found.binding)
        }
        Some(found) => Err(format!(
            "{label}: '{name}' is bound at set {}, binding {}; expected set {group}{}",
            found.group,
            found.binding,
            index.map(|index| format!(", binding {index}")).unwrap_or_default()
        )),
        None => Err(format!("{label}: '{name}' has no binding")),
    }
}

/// Parses one stage of a pass source with naga's GLSL frontend.
pub(crate) fn parse_stage(source: &str, stage: ShaderStage) -> Result<naga::Module, String> {
    let source = strip_parameter_pragmas(source);
    let mut options = glsl::Options::from(stage);
    options
        .defines
        .insert(stage_define(stage).to_string(), "1".to_string());
    glsl::Frontend::default()
        .parse(&options, &source)
        .map_err(|errors| errors.emit_to_string(&source))
}

/// Blanks `#pragma parameter` lines, keeping line numbers stable for diagnostics.
fn strip_parameter_pragmas(source: &str) -> Cow<'_, str> {
    if !source.lines().any(is_parameter_pragma) {
        return Cow::Borrowed(source);
    }
    let mut stripped = String::with_capacity(source.len());
    for line in source.lines() {
        if !is_parameter_pragma(line) {
            stripped.push_str(line);
        }
        stripped.push('\n');
    }
    Cow::Owned(stripped)
}

pub(crate) fn stage_define(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => VERTEX_DEFINE,
        _ => FRAGMENT_DEFINE,
    }
}

/// Shader identifier of the sampler paired with a texture identifier.
pub(crate) fn sampler_identifier(texture: &str) -> String {
    format!("{texture}_sampler")
}
