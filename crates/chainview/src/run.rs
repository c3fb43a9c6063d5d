use anyhow::{Context, Result};
use preset::ShaderPreset;
use renderchain::{plan_chain, ChainConfig, PassTarget, PixelFormat, ProgramSource, ScaleRule, Size, Viewport};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::bindings::{chain_config, VideoSettings};
use crate::cli::{PlanArgs, PresetArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub fn load_config(args: &PresetArgs, pixel_format: PixelFormat, frame: Option<Size>) -> Result<ChainConfig> {
    let preset = ShaderPreset::load(&args.preset)
        .with_context(|| format!("failed to load preset {}", args.preset.display()))?;
    tracing::debug!(
        preset = %args.preset.display(),
        passes = preset.passes.len(),
        textures = preset.textures.len(),
        "loaded preset"
    );
    let video = VideoSettings {
        input_scale: args.input_scale,
        pixel_format,
        smooth: args.smooth,
    };
    Ok(chain_config(&preset, video, frame))
}

#[derive(Debug, Serialize)]
struct PlanReport {
    viewport: [u32; 2],
    input_scale: u32,
    passes: Vec<PassReport>,
}

#[derive(Debug, Serialize)]
struct PassReport {
    index: usize,
    shader: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    scale_x: String,
    scale_y: String,
    input_texture: [u32; 2],
    input: [u32; 2],
    output: [u32; 2],
    target: String,
    target_size: [u32; 2],
}

fn dims(size: Size) -> [u32; 2] {
    [size.width, size.height]
}

fn describe_scale(rule: ScaleRule) -> String {
    match rule {
        ScaleRule::Input(factor) => format!("source x{factor}"),
        ScaleRule::Viewport(factor) => format!("viewport x{factor}"),
        ScaleRule::Absolute(pixels) => format!("absolute {pixels}px"),
    }
}

pub fn run_plan(args: PlanArgs) -> Result<()> {
    let config = load_config(&args.preset, PixelFormat::default(), None)?;
    let viewport = Viewport::from_size(args.preset.viewport);
    let plan = plan_chain(&config, viewport).context("failed to plan render chain")?;

    let passes = config
        .passes
        .iter()
        .zip(&plan.passes)
        .enumerate()
        .map(|(index, (link, planned))| {
            let (target, target_size) = match planned.target {
                PassTarget::Texture(size) => (format!("pass {} input", index + 1), size),
                PassTarget::BackBuffer(viewport) => ("back buffer".to_string(), viewport.size()),
            };
            PassReport {
                index,
                shader: match &link.program {
                    ProgramSource::Stock => "(stock)".to_string(),
                    ProgramSource::File(path) => path.display().to_string(),
                },
                alias: link.alias.clone(),
                scale_x: describe_scale(link.scale_x),
                scale_y: describe_scale(link.scale_y),
                input_texture: dims(planned.input_texture),
                input: dims(planned.input),
                output: dims(planned.output),
                target,
                target_size: dims(target_size),
            }
        })
        .collect();
    let report = PlanReport {
        viewport: dims(viewport.size()),
        input_scale: config.input_scale,
        passes,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Viewport {}x{}, input scale {}",
        report.viewport[0], report.viewport[1], report.input_scale
    );
    for pass in &report.passes {
        println!(
            "  pass {:<2} {:<28} x={:<16} y={:<16} texture={:>5}x{:<5} in={:>5}x{:<5} out={:>5}x{:<5} -> {} ({}x{})",
            pass.index,
            pass.shader,
            pass.scale_x,
            pass.scale_y,
            pass.input_texture[0],
            pass.input_texture[1],
            pass.input[0],
            pass.input[1],
            pass.output[0],
            pass.output[1],
            pass.target,
            pass.target_size[0],
            pass.target_size[1],
        );
        if let Some(alias) = &pass.alias {
            println!("           alias {alias}");
        }
    }
    Ok(())
}

#[cfg(feature = "wgpu-backend")]
pub fn run_render(args: crate::cli::RenderArgs) -> Result<()> {
    use anyhow::bail;
    use renderchain::gpu::{ContextOptions, WgpuDevice};
    use renderchain::pixels::{rgba_to_rgb565, rgba_to_xrgb8888};
    use renderchain::{Frame, FrameStatus, RenderChain};

    let image = image::open(&args.input)
        .with_context(|| format!("failed to open input image {}", args.input.display()))?
        .to_rgba8();
    let frame_size = Size::new(image.width(), image.height());

    let pixel_format = if args.rgb565 {
        PixelFormat::Rgb565
    } else {
        PixelFormat::Xrgb8888
    };
    let config = load_config(&args.preset, pixel_format, Some(frame_size))?;
    let texture = config.input_texture_size();
    if frame_size.width > texture.width || frame_size.height > texture.height {
        bail!(
            "input image of {frame_size} does not fit the {texture} first-stage texture; raise --input-scale"
        );
    }

    let data = match pixel_format {
        PixelFormat::Rgb565 => rgba_to_rgb565(image.as_raw()),
        PixelFormat::Xrgb8888 => rgba_to_xrgb8888(image.as_raw()),
    };
    let pitch = frame_size.width as usize * pixel_format.bytes_per_pixel();
    let frame = Frame::new(&data, frame_size.width, frame_size.height, pitch);

    let viewport = Viewport::from_size(args.preset.viewport);
    let options = ContextOptions {
        force_fallback_adapter: args.software,
        ..ContextOptions::default()
    };
    let device = WgpuDevice::new(viewport.size(), options).context("failed to initialise GPU")?;
    let (mut chain, fallback) = RenderChain::construct_or_passthrough(device, config, viewport)
        .map_err(|err| anyhow::Error::new(err.into_parts().0))?;
    if let Some(error) = fallback {
        tracing::warn!(error = %error, "preset failed to build; rendering with pass-through");
    }
    for mismatch in chain.binding_mismatches() {
        tracing::warn!(%mismatch, "shader input will never be bound");
    }
    for (name, value) in &args.params {
        match chain.set_shader_parameter(name, *value) {
            Some(stored) => tracing::info!(parameter = %name, value = stored, "set shader parameter"),
            None => tracing::warn!(parameter = %name, "no shader declares this parameter; ignoring"),
        }
    }

    let mut rendered = 0;
    for _ in 0..args.frames {
        match chain.render(&frame, args.rotation)? {
            FrameStatus::Rendered => {
                chain.present()?;
                rendered += 1;
            }
            FrameStatus::Dropped => tracing::warn!(frame = chain.frame_count(), "frame dropped"),
        }
    }
    tracing::info!(
        rendered,
        presented = chain.device().frames_presented(),
        requested = args.frames,
        "finished rendering"
    );

    let output = chain
        .device()
        .read_back_buffer()
        .context("failed to read back rendered frame")?;
    output
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    println!("Wrote {}", args.output.display());
    Ok(())
}

#[cfg(not(feature = "wgpu-backend"))]
pub fn run_render(_args: crate::cli::RenderArgs) -> Result<()> {
    anyhow::bail!("chainview was built without the `wgpu-backend` feature; rendering is unavailable")
}
