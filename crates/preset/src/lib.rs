//! Shader preset files.
//!
//! A preset is a TOML document listing the passes of a render chain and the
//! lookup textures they read:
//!
//! ```toml
//! input_scale = 2
//!
//! [[pass]]
//! shader = "shaders/scanline.glsl"
//! filter = "nearest"
//! scale_type = "source"
//! scale = 2.0
//!
//! [[pass]]
//! shader = "shaders/phosphor.glsl"
//! frame_count_mod = 64
//! alias = "phosphor"
//!
//! [[texture]]
//! name = "mask"
//! path = "textures/mask.png"
//! linear = false
//!
//! [parameters]
//! SCANLINE_WEIGHT = 0.4
//! ```
//!
//! Loading normalises the pass list so the final pass always renders at the
//! viewport's size.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Most passes a preset may declare.
pub const MAX_PASSES: usize = 16;
/// Most lookup textures a preset may declare.
pub const MAX_TEXTURES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("failed to read preset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse preset: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid preset: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapKind {
    #[default]
    ClampToBorder,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    /// Multiple of the pass's input size.
    #[default]
    Source,
    /// Multiple of the final viewport.
    Viewport,
    /// Fixed pixel count.
    Absolute,
}

/// Scale rule for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisScale {
    pub kind: ScaleKind,
    pub factor: f32,
}

impl AxisScale {
    pub const fn new(kind: ScaleKind, factor: f32) -> Self {
        Self { kind, factor }
    }

    pub const fn source() -> Self {
        Self::new(ScaleKind::Source, 1.0)
    }

    pub const fn viewport() -> Self {
        Self::new(ScaleKind::Viewport, 1.0)
    }
}

/// One normalised pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassPreset {
    /// Program file; `None` selects the built-in pass-through.
    pub shader: Option<PathBuf>,
    /// `None` follows the caller's smoothing preference.
    pub filter: Option<FilterKind>,
    pub wrap_mode: WrapKind,
    pub scale_x: AxisScale,
    pub scale_y: AxisScale,
    pub frame_count_mod: u32,
    pub float_framebuffer: bool,
    pub srgb_framebuffer: bool,
    /// Name later passes read this pass's output by.
    pub alias: Option<String>,
}

impl PassPreset {
    /// Built-in pass-through drawn at the viewport's size.
    pub fn stock() -> Self {
        Self {
            shader: None,
            filter: None,
            wrap_mode: WrapKind::default(),
            scale_x: AxisScale::viewport(),
            scale_y: AxisScale::viewport(),
            frame_count_mod: 0,
            float_framebuffer: false,
            srgb_framebuffer: false,
            alias: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TexturePreset {
    pub name: String,
    pub path: PathBuf,
    pub linear: bool,
    pub wrap_mode: WrapKind,
}

/// A loaded and normalised preset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShaderPreset {
    pub input_scale: Option<u32>,
    pub passes: Vec<PassPreset>,
    pub textures: Vec<TexturePreset>,
    /// Overrides for shader parameter defaults, by identifier.
    pub parameters: BTreeMap<String, f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPreset {
    input_scale: Option<u32>,
    #[serde(default, rename = "pass")]
    passes: Vec<RawPass>,
    #[serde(default, rename = "texture")]
    textures: Vec<RawTexture>,
    #[serde(default)]
    parameters: BTreeMap<String, f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPass {
    shader: Option<PathBuf>,
    filter: Option<FilterKind>,
    wrap_mode: Option<WrapKind>,
    scale_type: Option<ScaleKind>,
    scale_type_x: Option<ScaleKind>,
    scale_type_y: Option<ScaleKind>,
    scale: Option<f32>,
    scale_x: Option<f32>,
    scale_y: Option<f32>,
    #[serde(default)]
    frame_count_mod: u32,
    #[serde(default)]
    float_framebuffer: bool,
    #[serde(default)]
    srgb_framebuffer: bool,
    alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTexture {
    name: String,
    path: PathBuf,
    #[serde(default = "default_linear")]
    linear: bool,
    #[serde(default)]
    wrap_mode: WrapKind,
}

fn default_linear() -> bool {
    true
}

impl RawPass {
    fn has_explicit_scale(&self) -> bool {
        self.scale_type.is_some()
            || self.scale_type_x.is_some()
            || self.scale_type_y.is_some()
            || self.scale.is_some()
            || self.scale_x.is_some()
            || self.scale_y.is_some()
    }

    fn axis(&self, kind: Option<ScaleKind>, factor: Option<f32>) -> AxisScale {
        AxisScale {
            kind: kind.or(self.scale_type).unwrap_or_default(),
            factor: factor.or(self.scale).unwrap_or(1.0),
        }
    }

    fn resolve(self, base_dir: &Path) -> PassPreset {
        let scale_x = self.axis(self.scale_type_x, self.scale_x);
        let scale_y = self.axis(self.scale_type_y, self.scale_y);
        PassPreset {
            shader: self.shader.map(|path| resolve_path(base_dir, path)),
            filter: self.filter,
            wrap_mode: self.wrap_mode.unwrap_or_default(),
            scale_x,
            scale_y,
            frame_count_mod: self.frame_count_mod,
            float_framebuffer: self.float_framebuffer,
            srgb_framebuffer: self.srgb_framebuffer,
            alias: self.alias,
        }
    }
}

fn resolve_path(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

impl ShaderPreset {
    /// Loads a preset file. Any path without a `.toml` extension is taken as a
    /// single shader drawn at the viewport's size.
    pub fn load(path: &Path) -> Result<Self, PresetError> {
        let is_preset = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if !is_preset {
            return Ok(Self::single_shader(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|source| PresetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_str(&contents, base_dir)
    }

    /// Parses preset text, resolving relative paths against `base_dir`.
    pub fn from_toml_str(input: &str, base_dir: &Path) -> Result<Self, PresetError> {
        let raw: RawPreset = toml::from_str(input)?;
        if raw.passes.is_empty() {
            return Err(PresetError::Invalid(
                "preset must define at least one [[pass]]".into(),
            ));
        }
        if raw.passes.len() > MAX_PASSES {
            return Err(PresetError::Invalid(format!(
                "preset defines {} passes; at most {MAX_PASSES} are supported",
                raw.passes.len()
            )));
        }

        let last_explicit = raw
            .passes
            .last()
            .is_some_and(RawPass::has_explicit_scale);
        let mut passes: Vec<PassPreset> = raw
            .passes
            .into_iter()
            .map(|pass| pass.resolve(base_dir))
            .collect();
        if last_explicit && passes.len() < MAX_PASSES {
            passes.push(PassPreset::stock());
        } else if let Some(last) = passes.last_mut() {
            last.scale_x = AxisScale::viewport();
            last.scale_y = AxisScale::viewport();
        }

        let textures = raw
            .textures
            .into_iter()
            .map(|texture| TexturePreset {
                name: texture.name,
                path: resolve_path(base_dir, texture.path),
                linear: texture.linear,
                wrap_mode: texture.wrap_mode,
            })
            .collect();

        let preset = Self {
            input_scale: raw.input_scale,
            passes,
            textures,
            parameters: raw.parameters,
        };
        preset.validate()?;
        Ok(preset)
    }

    pub fn single_shader(shader: PathBuf) -> Self {
        Self {
            input_scale: None,
            passes: vec![PassPreset {
                shader: Some(shader),
                ..PassPreset::stock()
            }],
            textures: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), PresetError> {
        if let Some(0) = self.input_scale {
            return Err(PresetError::Invalid("input_scale must be at least 1".into()));
        }

        for (index, pass) in self.passes.iter().enumerate() {
            for (axis, scale) in [("x", pass.scale_x), ("y", pass.scale_y)] {
                validate_scale(index, axis, scale)?;
            }
            if let Some(alias) = &pass.alias {
                validate_alias(index, alias, self)?;
            }
        }

        if self.textures.len() > MAX_TEXTURES {
            return Err(PresetError::Invalid(format!(
                "preset defines {} textures; at most {MAX_TEXTURES} are supported",
                self.textures.len()
            )));
        }
        for (index, texture) in self.textures.iter().enumerate() {
            if texture.name.trim().is_empty() {
                return Err(PresetError::Invalid(format!(
                    "texture {index} has an empty name"
                )));
            }
            if self.textures[..index]
                .iter()
                .any(|other| other.name == texture.name)
            {
                return Err(PresetError::Invalid(format!(
                    "texture name '{}' is used more than once",
                    texture.name
                )));
            }
        }

        for (id, value) in &self.parameters {
            if !value.is_finite() {
                return Err(PresetError::Invalid(format!(
                    "parameter '{id}' must be a finite number, got {value}"
                )));
            }
        }

        Ok(())
    }
}

fn validate_alias(pass: usize, alias: &str, preset: &ShaderPreset) -> Result<(), PresetError> {
    let mut chars = alias.chars();
    let is_identifier = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !is_identifier {
        return Err(PresetError::Invalid(format!(
            "pass {pass} alias '{alias}' must be a letter or underscore followed by letters, digits or underscores"
        )));
    }
    if preset.passes[..pass]
        .iter()
        .any(|earlier| earlier.alias.as_deref() == Some(alias))
    {
        return Err(PresetError::Invalid(format!(
            "alias '{alias}' is used by more than one pass"
        )));
    }
    if preset.textures.iter().any(|texture| texture.name == alias) {
        return Err(PresetError::Invalid(format!(
            "pass {pass} alias '{alias}' is also a texture name"
        )));
    }
    Ok(())
}

fn validate_scale(pass: usize, axis: &str, scale: AxisScale) -> Result<(), PresetError> {
    if !scale.factor.is_finite() || scale.factor <= 0.0 {
        return Err(PresetError::Invalid(format!(
            "pass {pass} scale_{axis} must be a positive number, got {}",
            scale.factor
        )));
    }
    if scale.kind == ScaleKind::Absolute && scale.factor.fract() != 0.0 {
        return Err(PresetError::Invalid(format!(
            "pass {pass} scale_{axis} is absolute and must be a whole number of pixels, got {}",
            scale.factor
        )));
    }
    Ok(())
}
