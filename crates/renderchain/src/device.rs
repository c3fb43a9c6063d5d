use bytemuck::{Pod, Zeroable};

use crate::error::DeviceError;
use crate::program::{ProgramDesc, ShaderProgram};
use crate::types::{Frame, SamplerSpec, Size, TexelFormat, Viewport};

/// One corner of a pass's draw quad.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub tex_coord: [f32; 2],
    pub lut_tex_coord: [f32; 2],
    pub color: [f32; 4],
}

impl Vertex {
    /// Byte offset of `tex_coord`, shared by every stream that reads one.
    pub const TEX_COORD_OFFSET: u64 = 16;
    pub const LUT_TEX_COORD_OFFSET: u64 = 24;
    pub const COLOR_OFFSET: u64 = 32;
    pub const STRIDE: u64 = std::mem::size_of::<Vertex>() as u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub size: Size,
    pub format: TexelFormat,
}

/// Destination of subsequent draws.
#[derive(Debug)]
pub enum RenderTarget<'a, T> {
    BackBuffer,
    Texture(&'a T),
}

/// GPU abstraction the chain renders through.
///
/// Resources are owned handles: dropping one releases it. The chain is the only
/// caller and drives the device from a single thread.
pub trait GpuDevice {
    type Texture;
    type VertexBuffer;
    type Program: ShaderProgram;

    /// Format of the presentation target.
    fn back_buffer_format(&self) -> TexelFormat;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<Self::Texture, DeviceError>;

    /// Replaces the top-left `frame.width` x `frame.height` region, honouring `frame.pitch`.
    fn upload_texture(
        &mut self,
        texture: &Self::Texture,
        frame: &Frame<'_>,
    ) -> Result<(), DeviceError>;

    /// Fills the whole texture with transparent black.
    fn clear_texture(&mut self, texture: &Self::Texture) -> Result<(), DeviceError>;

    fn create_vertex_buffer(&mut self, label: &str) -> Result<Self::VertexBuffer, DeviceError>;

    fn write_vertices(
        &mut self,
        buffer: &Self::VertexBuffer,
        vertices: &[Vertex; 4],
    ) -> Result<(), DeviceError>;

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<Self::Program, DeviceError>;

    fn set_render_target(&mut self, target: RenderTarget<'_, Self::Texture>);

    fn set_viewport(&mut self, viewport: Viewport);

    /// Clears the presentation target.
    fn clear_back_buffer(&mut self) -> Result<(), DeviceError>;

    /// Makes `program` current, capturing its parameter values for the next draw.
    fn bind_program(&mut self, program: &Self::Program);

    fn bind_texture(&mut self, slot: u32, texture: &Self::Texture, sampler: SamplerSpec);

    fn unbind_texture(&mut self, slot: u32);

    fn bind_vertex_stream(&mut self, stream: u32, buffer: &Self::VertexBuffer);

    fn unbind_vertex_stream(&mut self, stream: u32);

    /// Draws a four-vertex triangle strip with the current bindings.
    fn draw_quad(&mut self) -> Result<(), DeviceError>;

    fn present(&mut self) -> Result<(), DeviceError>;

    fn is_lost(&self) -> bool;

    /// Lightweight recovery of the existing device. All chain resources are
    /// dropped before this is called.
    fn reset(&mut self) -> Result<(), DeviceError>;

    /// Tears down and recreates the underlying device and context.
    fn recreate(&mut self) -> Result<(), DeviceError>;
}
