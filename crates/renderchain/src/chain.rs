use std::fs;

use tracing::{debug, error, info, warn};

use crate::binding::{self, DrawParams};
use crate::device::{GpuDevice, RenderTarget};
use crate::error::{BindingMismatch, ChainError, ConstructError, DeviceError};
use crate::history::{HistoryRing, HISTORY_DEPTH};
use crate::lut::LutTable;
use crate::parameters::ParameterTable;
use crate::pass::{model_view_proj, InputSurface, Pass};
use crate::program::{ProgramDesc, ShaderCode, ShaderProgram};
use crate::recovery::{restore_device, ChainState, RestorePath};
use crate::scale::{self, plan_chain, ChainPlan};
use crate::types::{
    ChainConfig, Frame, LinkInfo, ProgramSource, Rotation, Size, TexelFormat, Viewport,
};

/// Outcome of one [`RenderChain::render`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Rendered,
    /// Recovery is still failing; nothing was drawn.
    Dropped,
}

/// All GPU resources of a built chain. Dropping it releases everything.
pub(crate) struct ChainResources<D: GpuDevice> {
    pub passes: Vec<Pass<D>>,
    pub history: HistoryRing<D>,
    pub luts: LutTable<D>,
    pub parameters: ParameterTable,
    pub mismatches: Vec<BindingMismatch>,
}

impl<D: GpuDevice> ChainResources<D> {
    fn build(device: &mut D, config: &ChainConfig, viewport: Viewport) -> Result<Self, ChainError> {
        let plan = plan_chain(config, viewport)?;
        binding::validate_aliases(config)?;
        let sources = config
            .passes
            .iter()
            .enumerate()
            .map(|(index, link)| read_source(index, link))
            .collect::<Result<Vec<_>, _>>()?;
        let parameters = ParameterTable::collect(
            sources.iter().flatten().map(String::as_str),
            &config.parameters,
        );

        let history = HistoryRing::new(
            device,
            config.input_texture_size(),
            config.pixel_format.texel_format(),
        )?;

        let last = config.passes.len() - 1;
        let mut passes = Vec::with_capacity(config.passes.len());
        for (index, (link, planned)) in config.passes.iter().zip(&plan.passes).enumerate() {
            let input = if index == 0 {
                None
            } else {
                let format = config.passes[index - 1].target_format();
                let label = format!("pass {index} input");
                Some(
                    InputSurface::allocate(device, &label, planned.input_texture, format)
                        .map_err(|source| ChainError::Pass { pass: index, source })?,
                )
            };
            let target = if index == last {
                device.back_buffer_format()
            } else {
                link.target_format()
            };
            let program = compile_pass(device, index, link, sources[index].as_deref(), target)?;
            debug!(
                pass = index,
                width = planned.input_texture.width,
                height = planned.input_texture.height,
                scale_x = ?link.scale_x,
                scale_y = ?link.scale_y,
                filter = ?link.filter,
                "built pass"
            );
            passes.push(Pass {
                link: link.clone(),
                program,
                input,
            });
        }

        let luts = LutTable::load(device, &config.luts)?;

        let lut_names: Vec<&str> = config.luts.iter().map(|lut| lut.name.as_str()).collect();
        let aliases: Vec<Option<&str>> = config.passes.iter().map(|link| link.alias.as_deref()).collect();
        let mut mismatches = Vec::new();
        for (index, pass) in passes.iter().enumerate() {
            let declared = pass.program.declared_inputs();
            for mismatch in binding::audit_inputs(index, &aliases, &declared, &lut_names) {
                warn!(%mismatch, "shader input left unbound");
                mismatches.push(mismatch);
            }
        }

        Ok(Self {
            passes,
            history,
            luts,
            parameters,
            mismatches,
        })
    }

    /// Surface pass `index` reads: the current history slot for pass 0.
    pub fn input_surface(&self, index: usize) -> &InputSurface<D> {
        match self.passes[index].input.as_ref() {
            Some(surface) => surface,
            None => self.history.current(),
        }
    }

    fn input_surface_mut(&mut self, index: usize) -> &mut InputSurface<D> {
        match self.passes[index].input.as_mut() {
            Some(surface) => surface,
            None => self.history.current_mut(),
        }
    }

    pub fn surface(&self, source: binding::InputSource) -> Option<&InputSurface<D>> {
        match source {
            binding::InputSource::History(slot) => Some(self.history.slot(slot)),
            binding::InputSource::Pass(pass) => Some(self.input_surface(pass)),
            binding::InputSource::Lut(_) => None,
        }
    }

    fn surfaces_mut(&mut self) -> impl Iterator<Item = &mut InputSurface<D>> {
        self.passes
            .iter_mut()
            .filter_map(|pass| pass.input.as_mut())
            .chain(self.history.slots_mut())
    }
}

fn read_source(index: usize, link: &LinkInfo) -> Result<Option<String>, ChainError> {
    match &link.program {
        ProgramSource::Stock => Ok(None),
        ProgramSource::File(path) => fs::read_to_string(path)
            .map(Some)
            .map_err(|source| ChainError::ShaderSource {
                pass: index,
                path: path.clone(),
                source,
            }),
    }
}

fn compile_pass<D: GpuDevice>(
    device: &mut D,
    index: usize,
    link: &LinkInfo,
    source: Option<&str>,
    target: TexelFormat,
) -> Result<D::Program, ChainError> {
    let label = format!("pass {index}");
    let code = match (&link.program, source) {
        (ProgramSource::File(path), Some(source)) => ShaderCode::Text { path, source },
        _ => ShaderCode::Stock,
    };
    device
        .compile_program(&ProgramDesc {
            label: &label,
            code,
            target,
        })
        .map_err(|source| ChainError::Pass { pass: index, source })
}

/// An ordered sequence of shader passes rendering raw frames to a device's
/// presentation target, with history frames, lookup textures, and recovery from
/// device loss.
pub struct RenderChain<D: GpuDevice> {
    device: D,
    config: ChainConfig,
    viewport: Viewport,
    resources: Option<ChainResources<D>>,
    state: ChainState,
    frame_count: u64,
    outputs: Vec<Size>,
}

impl<D: GpuDevice> RenderChain<D> {
    /// Builds every pass, the history ring, and the lookup textures. On failure all
    /// partially created resources are released and the device is handed back.
    pub fn construct(
        mut device: D,
        config: ChainConfig,
        viewport: Viewport,
    ) -> Result<Self, ConstructError<D>> {
        match ChainResources::build(&mut device, &config, viewport) {
            Ok(resources) => {
                info!(
                    passes = resources.passes.len(),
                    luts = resources.luts.len(),
                    history = HISTORY_DEPTH,
                    width = viewport.width,
                    height = viewport.height,
                    "render chain constructed"
                );
                Ok(Self {
                    device,
                    config,
                    viewport,
                    resources: Some(resources),
                    state: ChainState::Active,
                    frame_count: 0,
                    outputs: Vec::new(),
                })
            }
            Err(error) => {
                error!(error = %error, "failed to construct render chain");
                Err(ConstructError { error, device })
            }
        }
    }

    /// Like [`RenderChain::construct`], but falls back to a single pass-through pass
    /// when the requested chain cannot be built. The original error is returned
    /// alongside the fallback chain.
    pub fn construct_or_passthrough(
        device: D,
        config: ChainConfig,
        viewport: Viewport,
    ) -> Result<(Self, Option<ChainError>), ConstructError<D>> {
        let fallback =
            ChainConfig::passthrough(config.input_scale.max(1), config.pixel_format, config.smooth);
        match Self::construct(device, config, viewport) {
            Ok(chain) => Ok((chain, None)),
            Err(ConstructError { error, device }) => {
                warn!(error = %error, "falling back to pass-through chain");
                Self::construct(device, fallback, viewport).map(|chain| (chain, Some(error)))
            }
        }
    }

    /// Renders one frame through every pass into the presentation target.
    ///
    /// A lost device is recovered first. While recovery keeps failing the frame is
    /// dropped and `Ok(FrameStatus::Dropped)` is returned. A loss detected while
    /// rendering moves the chain to [`ChainState::Lost`] and returns
    /// [`ChainError::DeviceLost`]; the next call retries.
    pub fn render(
        &mut self,
        frame: &Frame<'_>,
        rotation: Rotation,
    ) -> Result<FrameStatus, ChainError> {
        if self.state == ChainState::Active && self.device.is_lost() {
            warn!(frame_count = self.frame_count, "device loss detected");
            self.state = ChainState::Lost;
        }
        if self.state != ChainState::Active && !self.recover() {
            return Ok(FrameStatus::Dropped);
        }

        match self.render_frame(frame, rotation) {
            Ok(()) => {
                self.frame_count += 1;
                if let Some(resources) = self.resources.as_mut() {
                    resources.history.advance();
                }
                Ok(FrameStatus::Rendered)
            }
            Err(error) if error.is_device_lost() => {
                warn!(error = %error, "device lost while rendering");
                self.state = ChainState::Lost;
                Err(ChainError::DeviceLost)
            }
            Err(error) => Err(error),
        }
    }

    fn render_frame(&mut self, frame: &Frame<'_>, rotation: Rotation) -> Result<(), ChainError> {
        let device = &mut self.device;
        let resources = self.resources.as_mut().ok_or(ChainError::DeviceLost)?;
        validate_frame(frame, &self.config, resources.history.texture_size())?;

        let slot = resources.history.current_mut();
        if slot.needs_clear || slot.last_size != Some(frame.size()) {
            device.clear_texture(&slot.texture)?;
            slot.needs_clear = false;
        }
        device.upload_texture(&slot.texture, frame)?;

        let viewport = self.viewport;
        let smooth = self.config.smooth;
        let last = resources.passes.len() - 1;
        let mut input = frame.size();
        self.outputs.clear();

        for index in 0..=last {
            let is_final = index == last;
            let output = scale::output_size(&resources.passes[index].link, input, viewport.size());

            let (ortho, output_uniform) = if is_final {
                device.set_render_target(RenderTarget::BackBuffer);
                device.clear_back_buffer()?;
                device.set_viewport(viewport);
                (viewport.size(), viewport.size())
            } else if let Some(target) = resources.passes[index + 1].input.as_mut() {
                device.set_render_target(RenderTarget::Texture(&target.texture));
                if target.needs_clear {
                    device.clear_texture(&target.texture)?;
                    target.needs_clear = false;
                }
                device.set_viewport(Viewport::from_size(output));
                (output, output)
            } else {
                return Err(ChainError::DeviceLost);
            };

            resources
                .input_surface_mut(index)
                .refresh_vertices(device, input, output)?;

            let inputs = binding::named_inputs(resources, index, smooth);
            let uniforms = binding::pass_uniforms(
                resources,
                index,
                &inputs,
                DrawParams {
                    input,
                    output: output_uniform,
                    mvp: model_view_proj(ortho, if is_final { rotation } else { Rotation::Deg0 }),
                    frame_count: self.frame_count,
                },
            );
            let program = &mut resources.passes[index].program;
            for (name, value) in uniforms {
                program.set_parameter(&name, value);
            }

            device.bind_program(&resources.passes[index].program);
            let bound = binding::bind_inputs(device, resources, index, &inputs, smooth);
            let drawn = device.draw_quad();
            binding::unbind_all(device, &bound);
            drawn.map_err(|source| ChainError::Pass { pass: index, source })?;

            self.outputs.push(output);
            input = output;
        }
        Ok(())
    }

    /// Presents the back buffer. A loss report moves the chain to [`ChainState::Lost`].
    pub fn present(&mut self) -> Result<(), ChainError> {
        match self.device.present() {
            Ok(()) => Ok(()),
            Err(DeviceError::Lost) => {
                warn!("device lost during present");
                self.state = ChainState::Lost;
                Err(ChainError::DeviceLost)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Tears everything down and rebuilds it against the current configuration.
    fn recover(&mut self) -> bool {
        self.state = ChainState::Rebuilding;
        self.resources = None;

        let path = match restore_device(&mut self.device) {
            Ok(path) => path,
            Err(error) => {
                error!(error = %error, "device recovery failed; dropping frame");
                self.state = ChainState::Lost;
                return false;
            }
        };

        let rebuilt = match ChainResources::build(&mut self.device, &self.config, self.viewport) {
            Err(error) if path == RestorePath::Reset => {
                warn!(error = %error, "rebuild after reset failed; recreating device");
                self.device
                    .recreate()
                    .map_err(ChainError::from)
                    .and_then(|()| ChainResources::build(&mut self.device, &self.config, self.viewport))
            }
            other => other,
        };

        match rebuilt {
            Ok(resources) => {
                self.resources = Some(resources);
                self.state = ChainState::Active;
                info!(frame_count = self.frame_count, path = ?path, "render chain restored");
                true
            }
            Err(error) => {
                error!(error = %error, "render chain rebuild failed; dropping frame");
                self.state = ChainState::Lost;
                false
            }
        }
    }

    /// Recomputes pass geometry for a new viewport, reallocating only textures whose
    /// size changed. Returns the number of reallocated textures. Repeating the
    /// current viewport is a no-op.
    ///
    /// Every pass target is cleared before its next draw. If a reallocation fails
    /// the chain keeps its previous viewport and rebuilds against it on the next
    /// frame.
    pub fn resize(&mut self, viewport: Viewport) -> Result<usize, ChainError> {
        if viewport == self.viewport {
            return Ok(0);
        }
        let plan = plan_chain(&self.config, viewport)?;
        let Some(resources) = self.resources.as_mut() else {
            self.viewport = viewport;
            return Ok(0);
        };

        let mut reallocated = 0;
        for (index, (pass, planned)) in resources.passes.iter_mut().zip(&plan.passes).enumerate() {
            let Some(surface) = pass.input.as_mut() else {
                continue;
            };
            let label = format!("pass {index} input");
            match surface.resize(&mut self.device, &label, planned.input_texture) {
                Ok(true) => {
                    debug!(
                        pass = index,
                        width = planned.input_texture.width,
                        height = planned.input_texture.height,
                        "reallocated pass texture"
                    );
                    reallocated += 1;
                }
                Ok(false) => {}
                Err(source) => {
                    warn!(pass = index, error = %source, "pass reallocation failed; rebuilding on next frame");
                    self.state = ChainState::Lost;
                    return Err(ChainError::Pass { pass: index, source });
                }
            }
            surface.needs_clear = true;
        }
        for surface in resources.surfaces_mut() {
            surface.stale = true;
        }
        self.viewport = viewport;
        Ok(reallocated)
    }

    /// Replaces the preset. On failure the current chain keeps running.
    pub fn reload(&mut self, config: ChainConfig) -> Result<(), ChainError> {
        match ChainResources::build(&mut self.device, &config, self.viewport) {
            Ok(resources) => {
                info!(passes = resources.passes.len(), "render chain reloaded");
                self.resources = Some(resources);
                self.config = config;
                self.state = ChainState::Active;
                self.outputs.clear();
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "preset reload failed; keeping current chain");
                Err(error)
            }
        }
    }

    /// Releases every chain resource and returns the device.
    pub fn destroy(mut self) -> D {
        self.resources = None;
        self.device
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Number of frames rendered since construction. Survives recovery.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn pass_count(&self) -> usize {
        self.config.passes.len()
    }

    /// Geometry plan for the current configuration and viewport.
    pub fn plan(&self) -> Result<ChainPlan, ChainError> {
        plan_chain(&self.config, self.viewport)
    }

    /// Allocated size of the texture pass `index` reads.
    pub fn pass_input_size(&self, index: usize) -> Option<Size> {
        let resources = self.resources.as_ref()?;
        (index < resources.passes.len()).then(|| resources.input_surface(index).size)
    }

    /// Allocated size of the texture pass `index` renders into; `None` for the final pass.
    pub fn pass_target_size(&self, index: usize) -> Option<Size> {
        let resources = self.resources.as_ref()?;
        resources
            .passes
            .get(index + 1)
            .and_then(|pass| pass.input.as_ref())
            .map(|surface| surface.size)
    }

    /// Unrounded output size of every pass in the last rendered frame.
    pub fn last_frame_outputs(&self) -> &[Size] {
        &self.outputs
    }

    /// Parameters declared by the running chain's shaders, with current values.
    pub fn shader_parameters(&self) -> Option<&ParameterTable> {
        self.resources.as_ref().map(|resources| &resources.parameters)
    }

    /// Changes a shader parameter, clamped to its declared range. The value is kept
    /// in the configuration so it survives recovery. Returns the stored value, or
    /// `None` when no pass declares `id`.
    pub fn set_shader_parameter(&mut self, id: &str, value: f32) -> Option<f32> {
        let stored = self.resources.as_mut()?.parameters.set(id, value)?;
        self.config.parameters.insert(id.to_string(), stored);
        debug!(parameter = id, value = stored, "shader parameter changed");
        Some(stored)
    }

    pub fn lut_count(&self) -> usize {
        self.resources.as_ref().map_or(0, |resources| resources.luts.len())
    }

    /// Declared shader inputs the chain cannot supply.
    pub fn binding_mismatches(&self) -> &[BindingMismatch] {
        match self.resources.as_ref() {
            Some(resources) => &resources.mismatches,
            None => &[],
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

fn validate_frame(frame: &Frame<'_>, config: &ChainConfig, texture: Size) -> Result<(), ChainError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(ChainError::InvalidFrame(format!(
            "frame size {} is empty",
            frame.size()
        )));
    }
    if frame.width > texture.width || frame.height > texture.height {
        return Err(ChainError::InvalidFrame(format!(
            "frame size {} exceeds input texture {texture}",
            frame.size()
        )));
    }
    let bpp = config.pixel_format.bytes_per_pixel();
    if frame.pitch < frame.width as usize * bpp {
        return Err(ChainError::InvalidFrame(format!(
            "pitch {} is shorter than a {}-pixel row",
            frame.pitch, frame.width
        )));
    }
    let required = frame.required_len(bpp);
    if frame.data.len() < required {
        return Err(ChainError::InvalidFrame(format!(
            "buffer holds {} bytes, {required} required",
            frame.data.len()
        )));
    }
    Ok(())
}
