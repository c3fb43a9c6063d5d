use crate::device::{GpuDevice, TextureDesc, Vertex};
use crate::error::DeviceError;
use crate::types::{LinkInfo, Rotation, Size, TexelFormat};

/// A texture read by a pass together with the quad that samples it.
pub(crate) struct InputSurface<D: GpuDevice> {
    pub texture: D::Texture,
    pub vertex_buffer: D::VertexBuffer,
    pub size: Size,
    pub format: TexelFormat,
    /// Content size the quad was last built for; `None` forces a rebuild.
    pub last_size: Option<Size>,
    /// Set on (re)allocation and on every viewport change; reset after a full clear.
    pub needs_clear: bool,
    /// Forces the next quad rebuild even if the content size is unchanged.
    pub stale: bool,
}

impl<D: GpuDevice> InputSurface<D> {
    pub fn allocate(
        device: &mut D,
        label: &str,
        size: Size,
        format: TexelFormat,
    ) -> Result<Self, DeviceError> {
        let texture = device.create_texture(&TextureDesc {
            label,
            size,
            format,
        })?;
        let vertex_buffer = device.create_vertex_buffer(label)?;
        Ok(Self {
            texture,
            vertex_buffer,
            size,
            format,
            last_size: None,
            needs_clear: true,
            stale: true,
        })
    }

    /// Replaces the texture when `size` differs. Returns whether it reallocated.
    pub fn resize(&mut self, device: &mut D, label: &str, size: Size) -> Result<bool, DeviceError> {
        if size == self.size {
            return Ok(false);
        }
        self.texture = device.create_texture(&TextureDesc {
            label,
            size,
            format: self.format,
        })?;
        self.size = size;
        self.last_size = None;
        self.needs_clear = true;
        self.stale = true;
        Ok(true)
    }

    /// Rebuilds the quad when the content size changed since the last rebuild.
    pub fn refresh_vertices(
        &mut self,
        device: &mut D,
        input: Size,
        output: Size,
    ) -> Result<(), DeviceError> {
        if !self.stale && self.last_size == Some(input) {
            return Ok(());
        }
        device.write_vertices(
            &self.vertex_buffer,
            &quad_vertices(input, self.size, output),
        )?;
        self.last_size = Some(input);
        self.stale = false;
        Ok(())
    }

    /// Content size last drawn from this surface, or zero before the first frame.
    pub fn video_size(&self) -> Size {
        self.last_size.unwrap_or_default()
    }
}

/// One stage of the chain. Pass 0 reads the history ring's current slot and owns
/// no input surface of its own.
pub(crate) struct Pass<D: GpuDevice> {
    pub link: LinkInfo,
    pub program: D::Program,
    pub input: Option<InputSurface<D>>,
}

/// Quad covering `output` pixels that samples the `input` region of a texture
/// allocated at `texture` size. Ordered for a triangle strip.
pub fn quad_vertices(input: Size, texture: Size, output: Size) -> [Vertex; 4] {
    let u = input.width as f32 / texture.width.max(1) as f32;
    let v = input.height as f32 / texture.height.max(1) as f32;
    let (w, h) = (output.width as f32, output.height as f32);
    let corner = |x: f32, y: f32, s: f32, t: f32, ls: f32, lt: f32| Vertex {
        position: [x, y, 0.0, 1.0],
        tex_coord: [s, t],
        lut_tex_coord: [ls, lt],
        color: [1.0; 4],
    };
    [
        corner(0.0, h, 0.0, 0.0, 0.0, 0.0),
        corner(w, h, u, 0.0, 1.0, 0.0),
        corner(0.0, 0.0, 0.0, v, 0.0, 1.0),
        corner(w, 0.0, u, v, 1.0, 1.0),
    ]
}

/// Orthographic projection of `(0..width, 0..height)` onto clip space, followed by
/// a rotation about the clip-space origin. Column major.
pub fn model_view_proj(size: Size, rotation: Rotation) -> [[f32; 4]; 4] {
    let sx = 2.0 / size.width.max(1) as f32;
    let sy = 2.0 / size.height.max(1) as f32;
    let (s, c) = rotation.radians().sin_cos();
    // Quarter turns land on exact axes.
    let (s, c) = (s.round(), c.round());
    [
        [c * sx, s * sx, 0.0, 0.0],
        [-s * sy, c * sy, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [s - c, -s - c, 0.0, 1.0],
    ]
}
