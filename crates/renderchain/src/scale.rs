//! Pass geometry: output sizes, power-of-two rounding, and whole-chain plans.

use crate::error::ChainError;
use crate::types::{Axis, ChainConfig, LinkInfo, ScaleRule, Size, Viewport, MAX_PASSES};

/// Smallest power of two greater than or equal to `value` (minimum 1).
pub fn next_pow2(value: u32) -> u32 {
    value.max(1).checked_next_power_of_two().unwrap_or(1 << 31)
}

/// Applies one axis of a scale rule. The result is truncated and never zero.
pub fn scale_axis(rule: ScaleRule, previous: u32, viewport: u32) -> u32 {
    let scaled = match rule {
        ScaleRule::Input(factor) => factor * previous as f32,
        ScaleRule::Viewport(factor) => factor * viewport as f32,
        ScaleRule::Absolute(pixels) => return pixels.max(1),
    };
    (scaled as u32).max(1)
}

/// Output size of a pass given the previous stage's output and the viewport.
pub fn output_size(link: &LinkInfo, previous: Size, viewport: Size) -> Size {
    Size::new(
        scale_axis(link.scale_x, previous.width, viewport.width),
        scale_axis(link.scale_y, previous.height, viewport.height),
    )
}

/// Rounds both axes up to the next power of two.
pub fn pow2_size(size: Size) -> Size {
    Size::new(next_pow2(size.width), next_pow2(size.height))
}

fn validate_rule(pass: usize, axis: Axis, rule: ScaleRule) -> Result<(), ChainError> {
    let reason = match rule {
        ScaleRule::Input(factor) | ScaleRule::Viewport(factor) if !factor.is_finite() => {
            format!("factor {factor} is not finite")
        }
        ScaleRule::Input(factor) | ScaleRule::Viewport(factor) if factor <= 0.0 => {
            format!("factor {factor} must be greater than zero")
        }
        ScaleRule::Absolute(0) => "absolute size must be greater than zero".to_string(),
        _ => return Ok(()),
    };
    Err(ChainError::InvalidScale { pass, axis, reason })
}

/// Checks the structural constraints shared by construction and planning.
pub fn validate(config: &ChainConfig) -> Result<(), ChainError> {
    if config.passes.is_empty() {
        return Err(ChainError::NoPasses);
    }
    if config.passes.len() > MAX_PASSES {
        return Err(ChainError::TooManyPasses {
            count: config.passes.len(),
            max: MAX_PASSES,
        });
    }
    if config.input_scale == 0 {
        return Err(ChainError::InvalidInputScale);
    }
    for (index, link) in config.passes.iter().enumerate() {
        validate_rule(index, Axis::X, link.scale_x)?;
        validate_rule(index, Axis::Y, link.scale_y)?;
    }
    Ok(())
}

/// Where a pass's draw lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    /// The next pass's input texture, with its allocated size.
    Texture(Size),
    /// The presentation target, restricted to the final viewport.
    BackBuffer(Viewport),
}

/// Geometry of one pass computed against the maximum input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassPlan {
    /// Allocated size of the texture this pass reads.
    pub input_texture: Size,
    /// Content size this pass receives.
    pub input: Size,
    /// Unrounded size this pass produces.
    pub output: Size,
    pub target: PassTarget,
}

/// Geometry of a whole chain for a viewport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPlan {
    pub viewport: Viewport,
    pub passes: Vec<PassPlan>,
}

impl ChainPlan {
    /// Allocated input texture sizes, one per pass.
    pub fn input_textures(&self) -> impl Iterator<Item = Size> + '_ {
        self.passes.iter().map(|pass| pass.input_texture)
    }
}

/// Sizes every pass for `viewport`. Pass 0 reads the fixed first-stage texture and
/// each later pass reads a power-of-two texture holding its predecessor's output.
pub fn plan_chain(config: &ChainConfig, viewport: Viewport) -> Result<ChainPlan, ChainError> {
    validate(config)?;

    let viewport_size = viewport.size();
    let last = config.passes.len() - 1;
    let mut input_texture = config.input_texture_size();
    let mut input = input_texture;
    let mut passes = Vec::with_capacity(config.passes.len());

    for (index, link) in config.passes.iter().enumerate() {
        let output = output_size(link, input, viewport_size);
        let target = if index == last {
            PassTarget::BackBuffer(viewport)
        } else {
            PassTarget::Texture(pow2_size(output))
        };
        passes.push(PassPlan {
            input_texture,
            input,
            output,
            target,
        });
        if let PassTarget::Texture(size) = target {
            input_texture = size;
        }
        input = output;
    }

    Ok(ChainPlan { viewport, passes })
}
