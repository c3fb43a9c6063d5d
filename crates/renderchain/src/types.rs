use std::collections::BTreeMap;
use std::path::PathBuf;

/// Side length, in texels, of the first-stage texture at an input scale of 1.
pub const BASE_UNIT: u32 = 256;

/// Upper bound on the number of passes a chain accepts.
pub const MAX_PASSES: usize = 16;

/// Upper bound on the number of lookup textures a chain accepts.
pub const MAX_LUTS: usize = 8;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_vec2(self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Region of the presentation target that receives the final pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A viewport anchored at the origin covering `size`.
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Per-axis sizing policy for a pass's output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleRule {
    /// Multiple of the previous stage's output.
    Input(f32),
    /// Multiple of the final viewport.
    Viewport(f32),
    /// Fixed pixel count, independent of input and viewport.
    Absolute(u32),
}

impl Default for ScaleRule {
    fn default() -> Self {
        Self::Input(1.0)
    }
}

/// Horizontal or vertical axis, used when reporting scale errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => f.write_str("x"),
            Axis::Y => f.write_str("y"),
        }
    }
}

/// Texture filtering requested by a pass or lookup texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Defer to the chain-wide smoothing default.
    #[default]
    Unspecified,
    Linear,
    Nearest,
}

impl FilterMode {
    /// Resolves `Unspecified` against the chain's smoothing default.
    pub fn resolve(self, smooth: bool) -> Filter {
        match self {
            FilterMode::Linear => Filter::Linear,
            FilterMode::Nearest => Filter::Nearest,
            FilterMode::Unspecified if smooth => Filter::Linear,
            FilterMode::Unspecified => Filter::Nearest,
        }
    }
}

/// Concrete sampler filter handed to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Linear,
    Nearest,
}

/// Addressing outside the `[0, 1]` texture coordinate range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    ClampToBorder,
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Sampler state used when a texture is bound to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerSpec {
    pub filter: Filter,
    pub wrap: WrapMode,
}

/// Where a pass's shader program comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProgramSource {
    /// The device's built-in pass-through program.
    #[default]
    Stock,
    /// A shader file compiled by the device.
    File(PathBuf),
}

/// Static description of one pass. Immutable once the chain is built.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    pub scale_x: ScaleRule,
    pub scale_y: ScaleRule,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    /// Wrap period for the `frame_count` uniform; zero disables wrapping.
    pub frame_count_mod: u32,
    /// Render into a floating-point target instead of 8-bit unorm.
    pub float_framebuffer: bool,
    /// Render into an sRGB-encoded target.
    pub srgb_framebuffer: bool,
    /// Name later passes use to read this pass's output.
    pub alias: Option<String>,
    pub program: ProgramSource,
}

impl LinkInfo {
    /// A pass using `program` with the same scale rule on both axes.
    pub fn new(program: ProgramSource, scale: ScaleRule) -> Self {
        Self {
            scale_x: scale,
            scale_y: scale,
            ..Self::default()
        }
        .with_program(program)
    }

    pub fn with_program(mut self, program: ProgramSource) -> Self {
        self.program = program;
        self
    }

    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Pixel format of the target this pass renders into when it is not final.
    pub fn target_format(&self) -> TexelFormat {
        if self.float_framebuffer {
            TexelFormat::Rgba16Float
        } else if self.srgb_framebuffer {
            TexelFormat::Rgba8Srgb
        } else {
            TexelFormat::Rgba8
        }
    }
}

impl Default for LinkInfo {
    fn default() -> Self {
        Self {
            scale_x: ScaleRule::default(),
            scale_y: ScaleRule::default(),
            filter: FilterMode::Unspecified,
            wrap: WrapMode::default(),
            frame_count_mod: 0,
            float_framebuffer: false,
            srgb_framebuffer: false,
            alias: None,
            program: ProgramSource::Stock,
        }
    }
}

/// Layout of raw frames handed to [`crate::RenderChain::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 16-bit 5:6:5 packed, little endian.
    Rgb565,
    /// 32-bit with bytes ordered B, G, R, unused.
    #[default]
    Xrgb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }

    pub fn texel_format(self) -> TexelFormat {
        match self {
            PixelFormat::Rgb565 => TexelFormat::Rgb565,
            PixelFormat::Xrgb8888 => TexelFormat::Xrgb8888,
        }
    }
}

/// Storage format of a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    Rgb565,
    Xrgb8888,
    Rgba8,
    Rgba8Srgb,
    Rgba16Float,
}

impl TexelFormat {
    /// Bytes per pixel of data uploaded into a texture of this format.
    pub fn upload_bytes_per_pixel(self) -> usize {
        match self {
            TexelFormat::Rgb565 => 2,
            TexelFormat::Xrgb8888 | TexelFormat::Rgba8 | TexelFormat::Rgba8Srgb => 4,
            TexelFormat::Rgba16Float => 8,
        }
    }
}

/// Output orientation applied by the final pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Builds a rotation from a count of quarter turns, wrapping past a full turn.
    pub fn from_quarter_turns(turns: u32) -> Self {
        match turns % 4 {
            0 => Rotation::Deg0,
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            _ => Rotation::Deg270,
        }
    }

    pub fn quarter_turns(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    pub fn radians(self) -> f32 {
        self.quarter_turns() as f32 * std::f32::consts::FRAC_PI_2
    }
}

/// Borrowed view of one raw decoded frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows.
    pub pitch: usize,
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, pitch: usize) -> Self {
        Self {
            data,
            width,
            height,
            pitch,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Minimum buffer length needed for this frame at `bytes_per_pixel`.
    pub fn required_len(&self, bytes_per_pixel: usize) -> usize {
        if self.height == 0 {
            return 0;
        }
        self.pitch * (self.height as usize - 1) + self.width as usize * bytes_per_pixel
    }
}

/// A lookup texture requested by the preset.
#[derive(Debug, Clone, PartialEq)]
pub struct LutSpec {
    /// Name shaders use to reference the texture.
    pub name: String,
    pub path: PathBuf,
    pub smooth: bool,
    pub wrap: WrapMode,
}

/// Everything needed to build a chain: the parsed preset plus video settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub passes: Vec<LinkInfo>,
    pub luts: Vec<LutSpec>,
    /// Multiplier applied to [`BASE_UNIT`] to size the first-stage texture.
    pub input_scale: u32,
    pub pixel_format: PixelFormat,
    /// Filter used by passes that leave theirs unspecified.
    pub smooth: bool,
    /// Values overriding the defaults of `#pragma parameter` declarations.
    pub parameters: BTreeMap<String, f32>,
}

impl ChainConfig {
    pub fn new(passes: Vec<LinkInfo>) -> Self {
        Self {
            passes,
            ..Self::default()
        }
    }

    /// Single stock pass scaled to the viewport, used when a preset fails to build.
    pub fn passthrough(input_scale: u32, pixel_format: PixelFormat, smooth: bool) -> Self {
        Self {
            passes: vec![LinkInfo::new(ProgramSource::Stock, ScaleRule::Viewport(1.0))],
            luts: Vec::new(),
            input_scale,
            pixel_format,
            smooth,
            parameters: BTreeMap::new(),
        }
    }

    /// Dimensions of the first-stage texture.
    pub fn input_texture_size(&self) -> Size {
        let side = self.input_scale.saturating_mul(BASE_UNIT);
        Size::new(side, side)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::passthrough(1, PixelFormat::default(), false)
    }
}
