use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use renderchain::{Rotation, Size};

#[derive(Parser, Debug)]
#[command(
    name = "chainview",
    author,
    version,
    about = "Plan and render multi-pass shader presets",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the texture and viewport geometry of every pass without touching the GPU.
    Plan(PlanArgs),
    /// Run an image through a preset on a headless GPU and save the result.
    Render(RenderArgs),
}

#[derive(Args, Debug)]
pub struct PresetArgs {
    /// Preset file (`.toml`) or a single GLSL shader.
    #[arg(value_name = "PRESET")]
    pub preset: PathBuf,

    /// Final viewport size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub viewport: Size,

    /// Multiple of 256 pixels for the first-stage texture. Overrides the preset.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=16))]
    pub input_scale: Option<u32>,

    /// Use linear filtering where a pass leaves the filter unspecified.
    #[arg(long)]
    pub smooth: bool,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub preset: PresetArgs,

    /// Emit the plan as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub preset: PresetArgs,

    /// Image fed to the chain as the raw frame.
    #[arg(long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// PNG written from the back buffer after the last frame.
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,

    /// Number of frames to render; history inputs fill up over several frames.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub frames: u32,

    /// Rotation of the final image in degrees.
    #[arg(long, value_name = "DEGREES", value_parser = parse_rotation, default_value = "0")]
    pub rotation: Rotation,

    /// Upload frames as packed RGB565 instead of XRGB8888.
    #[arg(long)]
    pub rgb565: bool,

    /// Prefer a software adapter.
    #[arg(long)]
    pub software: bool,

    /// Shader parameter value (e.g. `SCANLINE_WEIGHT=0.4`). Repeatable; wins over the preset.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_parameter)]
    pub params: Vec<(String, f32)>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<Size, String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".into());
    }
    Ok(Size::new(width, height))
}

pub fn parse_parameter(value: &str) -> Result<(String, f32), String> {
    let (name, number) = value
        .split_once('=')
        .ok_or_else(|| "expected NAME=VALUE".to_string())?;
    let name = name.trim();
    if name.is_empty() {
        return Err("parameter name is empty".into());
    }
    let number = number
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|number| number.is_finite())
        .ok_or_else(|| format!("invalid value '{}' for {name}", number.trim()))?;
    Ok((name.to_string(), number))
}

pub fn parse_rotation(value: &str) -> Result<Rotation, String> {
    match value.trim() {
        "0" => Ok(Rotation::Deg0),
        "90" => Ok(Rotation::Deg90),
        "180" => Ok(Rotation::Deg180),
        "270" => Ok(Rotation::Deg270),
        other => Err(format!("invalid rotation '{other}'; expected 0, 90, 180, or 270")),
    }
}
