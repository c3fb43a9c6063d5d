//! Resolution of a pass's named inputs against the chain's resources.
//!
//! Every pass may read its own input (`IN`), the untouched first-stage frame
//! (`ORIG`), history frames (`PREV` to `PREV6`), outputs of earlier non-adjacent
//! passes (`PASS1` onwards), earlier passes by alias, and lookup textures by
//! name. Only names the compiled program reflects are bound; everything else is
//! skipped silently.

use crate::chain::ChainResources;
use crate::device::GpuDevice;
use crate::error::{BindingMismatch, ChainError};
use crate::history::{history_name, HISTORY_DEPTH};
use crate::program::{ShaderProgram, UniformValue};
use crate::types::{ChainConfig, SamplerSpec, Size};

/// A texture-backed input of a pass and where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputSource {
    /// Ring slot by absolute index.
    History(usize),
    /// Input surface of the given pass.
    Pass(usize),
    Lut(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NamedInput {
    /// Name prefix (`ORIG`, `PREV2`, `PASS1`, a pass alias) or lookup texture name.
    pub name: String,
    pub source: InputSource,
    pub sampler: SamplerSpec,
}

impl NamedInput {
    pub fn texture_name(&self) -> String {
        match self.source {
            InputSource::Lut(_) => self.name.clone(),
            _ => format!("{}.texture", self.name),
        }
    }

    pub fn tex_coord_name(&self) -> Option<String> {
        match self.source {
            InputSource::Lut(_) => None,
            _ => Some(format!("{}.tex_coord", self.name)),
        }
    }
}

/// Slots and streams bound for one draw, released by [`unbind_all`].
#[derive(Debug, Default)]
pub(crate) struct BoundInputs {
    slots: Vec<u32>,
    streams: Vec<u32>,
}

impl BoundInputs {
    fn slot(&mut self, slot: u32) {
        if !self.slots.contains(&slot) {
            self.slots.push(slot);
        }
    }

    fn stream(&mut self, stream: u32) {
        if !self.streams.contains(&stream) {
            self.streams.push(stream);
        }
    }
}

fn sampler_for<D: GpuDevice>(resources: &ChainResources<D>, pass: usize, smooth: bool) -> SamplerSpec {
    let link = &resources.passes[pass].link;
    SamplerSpec {
        filter: link.filter.resolve(smooth),
        wrap: link.wrap,
    }
}

/// Inputs pass `index` may read besides its own, in binding order.
pub(crate) fn named_inputs<D: GpuDevice>(
    resources: &ChainResources<D>,
    index: usize,
    smooth: bool,
) -> Vec<NamedInput> {
    let first = sampler_for(resources, 0, smooth);
    let mut inputs = Vec::with_capacity(1 + HISTORY_DEPTH + index + resources.luts.len());

    inputs.push(NamedInput {
        name: "ORIG".to_string(),
        source: InputSource::History(resources.history.slot_index(0)),
        sampler: first,
    });
    for back in 1..=HISTORY_DEPTH {
        inputs.push(NamedInput {
            name: history_name(back),
            source: InputSource::History(resources.history.slot_index(back)),
            sampler: first,
        });
    }
    // `PASSk` is the texture pass k reads, so the newest offered is two stages back.
    for earlier in 1..index {
        inputs.push(NamedInput {
            name: format!("PASS{earlier}"),
            source: InputSource::Pass(earlier),
            sampler: sampler_for(resources, earlier, smooth),
        });
    }
    // An alias names a pass's output, which is the input of the pass after it.
    for (earlier, pass) in resources.passes[..index].iter().enumerate() {
        if let Some(alias) = &pass.link.alias {
            inputs.push(NamedInput {
                name: alias.clone(),
                source: InputSource::Pass(earlier + 1),
                sampler: sampler_for(resources, earlier + 1, smooth),
            });
        }
    }
    for (lut_index, lut) in resources.luts.iter().enumerate() {
        inputs.push(NamedInput {
            name: lut.name.clone(),
            source: InputSource::Lut(lut_index),
            sampler: lut.sampler,
        });
    }
    inputs
}

/// Wraps the chain's frame counter by the pass's period.
pub fn frame_count_uniform(frame_count: u64, modulo: u32) -> f32 {
    if modulo == 0 {
        frame_count as f32
    } else {
        (frame_count % u64::from(modulo)) as f32
    }
}

/// Per-draw values fed to [`pass_uniforms`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct DrawParams {
    pub input: Size,
    pub output: Size,
    pub mvp: [[f32; 4]; 4],
    pub frame_count: u64,
}

/// Every uniform pass `index` may declare, by logical name.
pub(crate) fn pass_uniforms<D: GpuDevice>(
    resources: &ChainResources<D>,
    index: usize,
    inputs: &[NamedInput],
    params: DrawParams,
) -> Vec<(String, UniformValue)> {
    let own = resources.input_surface(index);
    let link = &resources.passes[index].link;
    let mut uniforms = vec![
        ("modelViewProj".to_string(), UniformValue::Mat4(params.mvp)),
        ("IN.video_size".to_string(), UniformValue::Vec2(params.input.as_vec2())),
        ("IN.texture_size".to_string(), UniformValue::Vec2(own.size.as_vec2())),
        ("IN.output_size".to_string(), UniformValue::Vec2(params.output.as_vec2())),
        (
            "IN.frame_count".to_string(),
            UniformValue::Float(frame_count_uniform(params.frame_count, link.frame_count_mod)),
        ),
    ];

    for input in inputs {
        let Some(surface) = resources.surface(input.source) else {
            continue;
        };
        uniforms.push((
            format!("{}.video_size", input.name),
            UniformValue::Vec2(surface.video_size().as_vec2()),
        ));
        uniforms.push((
            format!("{}.texture_size", input.name),
            UniformValue::Vec2(surface.size.as_vec2()),
        ));
    }
    for param in resources.parameters.iter() {
        uniforms.push((param.id.clone(), UniformValue::Float(param.current)));
    }
    uniforms
}

/// Binds the pass's own input and every reflected named input.
pub(crate) fn bind_inputs<D: GpuDevice>(
    device: &mut D,
    resources: &ChainResources<D>,
    index: usize,
    inputs: &[NamedInput],
    smooth: bool,
) -> BoundInputs {
    let program = &resources.passes[index].program;
    let own = resources.input_surface(index);
    let mut bound = BoundInputs::default();

    let slot = program.sampler_slot("IN.texture").unwrap_or(0);
    device.bind_texture(slot, &own.texture, sampler_for(resources, index, smooth));
    bound.slot(slot);
    device.bind_vertex_stream(0, &own.vertex_buffer);
    bound.stream(0);

    for input in inputs {
        let Some(slot) = program.sampler_slot(&input.texture_name()) else {
            continue;
        };
        match input.source {
            InputSource::Lut(lut) => {
                if let Some(entry) = resources.luts.get(lut) {
                    device.bind_texture(slot, &entry.texture, input.sampler);
                    bound.slot(slot);
                }
            }
            InputSource::History(_) | InputSource::Pass(_) => {
                let Some(surface) = resources.surface(input.source) else {
                    continue;
                };
                device.bind_texture(slot, &surface.texture, input.sampler);
                bound.slot(slot);
                let stream = input
                    .tex_coord_name()
                    .and_then(|name| program.attribute_stream(&name));
                if let Some(stream) = stream {
                    device.bind_vertex_stream(stream, &surface.vertex_buffer);
                    bound.stream(stream);
                }
            }
        }
    }
    bound
}

/// Releases everything bound for a draw so no later pass samples its own target.
pub(crate) fn unbind_all<D: GpuDevice>(device: &mut D, bound: &BoundInputs) {
    for &slot in &bound.slots {
        device.unbind_texture(slot);
    }
    for &stream in &bound.streams {
        device.unbind_vertex_stream(stream);
    }
}

/// Reports declared sampler inputs the chain can never supply to pass `index`.
/// `aliases` holds one entry per pass of the chain.
pub fn audit_inputs(
    index: usize,
    aliases: &[Option<&str>],
    declared: &[String],
    lut_names: &[&str],
) -> Vec<BindingMismatch> {
    let pass_count = aliases.len();
    let mismatch = |name: &str, reason: String| BindingMismatch {
        pass: index,
        name: name.to_string(),
        reason,
    };

    let mut found = Vec::new();
    for name in declared {
        if lut_names.contains(&name.as_str()) {
            continue;
        }
        let Some(prefix) = name.strip_suffix(".texture") else {
            found.push(mismatch(name, "does not match any lookup texture".to_string()));
            continue;
        };
        if matches!(prefix, "IN" | "ORIG") {
            continue;
        }
        if let Some(owner) = aliases.iter().position(|alias| *alias == Some(prefix)) {
            if owner >= index {
                found.push(mismatch(name, format!("names the output of pass {owner}, which runs later")));
            }
            continue;
        }
        if let Some(rest) = prefix.strip_prefix("PREV") {
            let back = if rest.is_empty() {
                Some(1)
            } else {
                rest.parse::<usize>().ok().map(|n| n + 1)
            };
            match back {
                Some(back) if (1..=HISTORY_DEPTH).contains(&back) => continue,
                Some(_) => {
                    found.push(mismatch(
                        name,
                        format!("is beyond the {HISTORY_DEPTH} frames of history"),
                    ));
                    continue;
                }
                None => {}
            }
        }
        if let Some(rest) = prefix.strip_prefix("PASS") {
            if let Ok(earlier) = rest.parse::<usize>() {
                if earlier >= 1 && earlier < index {
                    continue;
                }
                let reason = if earlier == 0 || earlier >= pass_count {
                    format!("refers to a pass that does not exist ({pass_count} passes)")
                } else {
                    "is not an earlier, non-adjacent pass".to_string()
                };
                found.push(mismatch(name, reason));
                continue;
            }
        }
        found.push(mismatch(name, "does not name a chain input".to_string()));
    }
    found
}

fn is_reserved_name(name: &str) -> bool {
    let numbered = |prefix: &str| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.bytes().all(|b| b.is_ascii_digit()))
    };
    matches!(name, "IN" | "ORIG") || numbered("PREV") || numbered("PASS")
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks that pass aliases are usable shader identifiers and name one pass each.
pub fn validate_aliases(config: &ChainConfig) -> Result<(), ChainError> {
    for (pass, link) in config.passes.iter().enumerate() {
        let Some(alias) = link.alias.as_deref() else {
            continue;
        };
        let invalid = |reason: &str| ChainError::InvalidAlias {
            pass,
            alias: alias.to_string(),
            reason: reason.to_string(),
        };
        if !is_identifier(alias) {
            return Err(invalid("is not a shader identifier"));
        }
        if is_reserved_name(alias) {
            return Err(invalid("shadows a built-in input"));
        }
        if config.luts.iter().any(|lut| lut.name == alias) {
            return Err(invalid("is also a lookup texture name"));
        }
        if config.passes[..pass]
            .iter()
            .any(|earlier| earlier.alias.as_deref() == Some(alias))
        {
            return Err(invalid("is used by an earlier pass"));
        }
    }
    Ok(())
}
