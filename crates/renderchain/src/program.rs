use std::path::Path;

/// Value written into a named shader parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    /// Column-major 4x4 matrix.
    Mat4([[f32; 4]; 4]),
}

/// Source text for a program, or the device's built-in pass-through.
#[derive(Debug, Clone, Copy)]
pub enum ShaderCode<'a> {
    Stock,
    Text { path: &'a Path, source: &'a str },
}

/// Compile request for one pass's program.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub code: ShaderCode<'a>,
    /// Format of the target the program renders into.
    pub target: crate::types::TexelFormat,
}

/// A compiled vertex and fragment program pair with name-based reflection.
///
/// Names are logical, dot separated identifiers such as `IN.video_size`,
/// `PREV2.texture`, or `ORIG.tex_coord`. Lookup texture names are used as-is.
/// A missing name is never an error: shaders only declare what they read.
pub trait ShaderProgram {
    /// Stores a uniform value. Returns `false` when the program does not declare `name`.
    fn set_parameter(&mut self, name: &str, value: UniformValue) -> bool;

    /// Texture slot reflected for a sampler input.
    fn sampler_slot(&self, name: &str) -> Option<u32>;

    /// Vertex stream reflected for a per-input texture coordinate attribute.
    fn attribute_stream(&self, name: &str) -> Option<u32>;

    /// Every sampler input the program declares, as logical names.
    fn declared_inputs(&self) -> Vec<String>;
}

/// Maps a logical input name to the identifier shader authors write.
pub fn shader_identifier(name: &str) -> String {
    name.replace('.', "_")
}

/// Inverse of [`shader_identifier`] for texture inputs (`ORIG_texture` to `ORIG.texture`).
pub fn logical_texture_name(identifier: &str) -> String {
    match identifier.strip_suffix("_texture") {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}.texture"),
        _ => identifier.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip_for_textures() {
        assert_eq!(shader_identifier("PREV3.texture"), "PREV3_texture");
        assert_eq!(logical_texture_name("PREV3_texture"), "PREV3.texture");
        assert_eq!(logical_texture_name("phosphor"), "phosphor");
        assert_eq!(logical_texture_name("_texture"), "_texture");
    }
}
