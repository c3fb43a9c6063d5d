//! User-tunable shader parameters.
//!
//! A pass shader declares a parameter with a pragma line:
//!
//! ```text
//! #pragma parameter SCANLINE_WEIGHT "Scanline weight" 0.6 0.0 1.0 0.05
//! ```
//!
//! The fields are the identifier, a description, the initial value, the minimum,
//! the maximum and an optional step. The chain collects every declaration across
//! its passes, applies the preset's overrides, and feeds the current values to
//! every pass as float uniforms named by the identifier.

use std::collections::BTreeMap;

use tracing::{debug, warn};

/// Most parameters a chain tracks; later declarations are ignored.
pub const MAX_PARAMETERS: usize = 64;

const PRAGMA: &str = "#pragma parameter";

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderParameter {
    pub id: String,
    pub description: String,
    pub initial: f32,
    pub minimum: f32,
    pub maximum: f32,
    pub step: f32,
    pub current: f32,
}

/// Parses every `#pragma parameter` line in `source`. Malformed lines are skipped.
pub fn parse_pragmas(source: &str) -> Vec<ShaderParameter> {
    source.lines().filter_map(parse_pragma).collect()
}

/// Whether `line` is a parameter declaration rather than shader code.
pub fn is_parameter_pragma(line: &str) -> bool {
    line.trim_start().starts_with(PRAGMA)
}

fn parse_pragma(line: &str) -> Option<ShaderParameter> {
    let rest = line.trim_start().strip_prefix(PRAGMA)?;
    let (id, rest) = rest.trim_start().split_once(char::is_whitespace)?;
    let rest = rest.trim_start().strip_prefix('"')?;
    let (description, rest) = rest.split_once('"')?;

    let numbers: Vec<f32> = rest
        .split_whitespace()
        .map_while(|word| word.parse().ok())
        .collect();
    let (initial, minimum, maximum) = match numbers.as_slice() {
        [initial, minimum, maximum, ..] => (*initial, *minimum, *maximum),
        _ => return None,
    };
    let step = numbers
        .get(3)
        .copied()
        .unwrap_or(0.1 * (maximum - minimum));

    Some(ShaderParameter {
        id: id.to_string(),
        description: description.to_string(),
        initial,
        minimum,
        maximum,
        step,
        current: initial,
    })
}

/// Every parameter the chain's passes declare, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    params: Vec<ShaderParameter>,
}

impl ParameterTable {
    /// Collects declarations from each pass source in order, keeping the first
    /// declaration of a repeated identifier, then applies `overrides`.
    pub fn collect<'a>(
        sources: impl IntoIterator<Item = &'a str>,
        overrides: &BTreeMap<String, f32>,
    ) -> Self {
        let mut params: Vec<ShaderParameter> = Vec::new();
        for source in sources {
            for param in parse_pragmas(source) {
                if params.len() == MAX_PARAMETERS {
                    warn!(parameter = %param.id, max = MAX_PARAMETERS, "too many shader parameters; ignoring");
                    continue;
                }
                if params.iter().any(|known| known.id == param.id) {
                    continue;
                }
                debug!(
                    parameter = %param.id,
                    initial = param.initial,
                    minimum = param.minimum,
                    maximum = param.maximum,
                    "found shader parameter"
                );
                params.push(param);
            }
        }

        let mut table = Self { params };
        for (id, value) in overrides {
            match table.params.iter_mut().find(|param| &param.id == id) {
                Some(param) => param.current = *value,
                None => warn!(parameter = %id, "preset sets a parameter no shader declares; ignoring"),
            }
        }
        table
    }

    pub fn get(&self, id: &str) -> Option<&ShaderParameter> {
        self.params.iter().find(|param| param.id == id)
    }

    /// Sets a parameter's current value, clamped to its declared range. Returns the
    /// stored value, or `None` when no pass declares `id`.
    pub fn set(&mut self, id: &str, value: f32) -> Option<f32> {
        let param = self.params.iter_mut().find(|param| param.id == id)?;
        let (low, high) = if param.minimum <= param.maximum {
            (param.minimum, param.maximum)
        } else {
            (param.maximum, param.minimum)
        };
        param.current = value.clamp(low, high);
        Some(param.current)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShaderParameter> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
