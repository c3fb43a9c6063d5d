use preset::{AxisScale, FilterKind, PassPreset, ScaleKind, ShaderPreset, TexturePreset, WrapKind};
use renderchain::{
    ChainConfig, FilterMode, LinkInfo, LutSpec, PixelFormat, ProgramSource, ScaleRule, Size,
    WrapMode, BASE_UNIT,
};

/// Video settings that are not part of the preset itself.
#[derive(Debug, Clone, Copy)]
pub struct VideoSettings {
    pub input_scale: Option<u32>,
    pub pixel_format: PixelFormat,
    pub smooth: bool,
}

/// Builds the chain configuration for `preset`. The input scale comes from the
/// command line, then the preset, then the smallest scale that fits `frame`.
pub fn chain_config(preset: &ShaderPreset, video: VideoSettings, frame: Option<Size>) -> ChainConfig {
    let input_scale = video
        .input_scale
        .or(preset.input_scale)
        .unwrap_or_else(|| frame.map_or(1, fitting_input_scale));

    ChainConfig {
        passes: preset.passes.iter().map(link_info).collect(),
        luts: preset.textures.iter().map(lut_spec).collect(),
        input_scale,
        pixel_format: video.pixel_format,
        smooth: video.smooth,
        parameters: preset.parameters.clone(),
    }
}

/// Smallest multiple of the base unit that holds `frame`.
pub fn fitting_input_scale(frame: Size) -> u32 {
    frame.width.max(frame.height).div_ceil(BASE_UNIT).max(1)
}

fn link_info(pass: &PassPreset) -> LinkInfo {
    LinkInfo {
        scale_x: scale_rule(pass.scale_x),
        scale_y: scale_rule(pass.scale_y),
        filter: match pass.filter {
            None => FilterMode::Unspecified,
            Some(FilterKind::Linear) => FilterMode::Linear,
            Some(FilterKind::Nearest) => FilterMode::Nearest,
        },
        wrap: wrap_mode(pass.wrap_mode),
        frame_count_mod: pass.frame_count_mod,
        float_framebuffer: pass.float_framebuffer,
        srgb_framebuffer: pass.srgb_framebuffer,
        alias: pass.alias.clone(),
        program: match &pass.shader {
            Some(path) => ProgramSource::File(path.clone()),
            None => ProgramSource::Stock,
        },
    }
}

fn scale_rule(scale: AxisScale) -> ScaleRule {
    match scale.kind {
        ScaleKind::Source => ScaleRule::Input(scale.factor),
        ScaleKind::Viewport => ScaleRule::Viewport(scale.factor),
        ScaleKind::Absolute => ScaleRule::Absolute(scale.factor as u32),
    }
}

fn wrap_mode(wrap: WrapKind) -> WrapMode {
    match wrap {
        WrapKind::ClampToBorder => WrapMode::ClampToBorder,
        WrapKind::ClampToEdge => WrapMode::ClampToEdge,
        WrapKind::Repeat => WrapMode::Repeat,
        WrapKind::MirroredRepeat => WrapMode::MirroredRepeat,
    }
}

fn lut_spec(texture: &TexturePreset) -> LutSpec {
    LutSpec {
        name: texture.name.clone(),
        path: texture.path.clone(),
        smooth: texture.linear,
        wrap: wrap_mode(texture.wrap_mode),
    }
}
