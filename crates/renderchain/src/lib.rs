//! Multi-pass shader render chain.
//!
//! A [`RenderChain`] takes one raw decoded frame per call and runs it through an
//! ordered list of shader passes before drawing the result into a device's
//! presentation target:
//!
//! ```text
//!   raw frame ──▶ history slot (pass 0 input) ──▶ pass 0 ──▶ pass 1 input
//!                        │                                     │
//!                        ├─ ORIG / PREV..PREV6 ───────────────▶├─ pass 1 ──▶ ...
//!                        │                                     │
//!   lookup textures ─────┴─────────────────────────────────────┴──▶ final pass ──▶ back buffer
//! ```
//!
//! Every intermediate texture is sized by [`scale::plan_chain`] and rounded up
//! to a power of two; the final pass draws at its exact size. Shaders pick up
//! inputs by name (`IN.video_size`, `PREV2.texture`, `PASS1.tex_coord`, a pass
//! alias, a lookup texture's name, a `#pragma parameter` identifier) and
//! anything they do not declare is skipped.
//!
//! The chain talks to the GPU through [`GpuDevice`]. With the default
//! `wgpu-backend` feature, [`gpu::WgpuDevice`] renders headlessly through `wgpu`
//! and compiles GLSL passes with naga.

mod binding;
mod chain;
mod device;
mod error;
mod history;
mod lut;
mod pass;
mod program;
mod recovery;

pub mod parameters;
pub mod pixels;
pub mod scale;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod gpu;

pub use binding::{audit_inputs, frame_count_uniform, validate_aliases};
pub use chain::{FrameStatus, RenderChain};
pub use device::{GpuDevice, RenderTarget, TextureDesc, Vertex};
pub use error::{BindingMismatch, ChainError, ConstructError, DeviceError};
pub use history::{history_name, HISTORY_DEPTH, HISTORY_SLOTS};
pub use parameters::{ParameterTable, ShaderParameter, MAX_PARAMETERS};
pub use pass::{model_view_proj, quad_vertices};
pub use program::{
    logical_texture_name, shader_identifier, ProgramDesc, ShaderCode, ShaderProgram, UniformValue,
};
pub use recovery::{ChainState, RestorePath};
pub use scale::{plan_chain, ChainPlan, PassPlan, PassTarget};
pub use types::{
    Axis, ChainConfig, Filter, FilterMode, Frame, LinkInfo, LutSpec, PixelFormat, ProgramSource,
    Rotation, SamplerSpec, ScaleRule, Size, TexelFormat, Viewport, WrapMode, BASE_UNIT, MAX_LUTS,
    MAX_PASSES,
};
