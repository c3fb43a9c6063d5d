#![allow(dead_code)]

//! A `GpuDevice` that records every call, counts live resources, and injects
//! failures on demand.
//!
//! Programs are described by small declaration files instead of shader code:
//!
//! ```text
//! sampler PREV.texture 2     # texture input and its reflected slot
//! stream PREV.tex_coord 1    # per-input texture coordinate stream
//! uniform IN.video_size      # parameter the program declares
//! fail                       # compilation fails
//! ```

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use renderchain::{
    DeviceError, Frame, GpuDevice, ProgramDesc, RenderTarget, SamplerSpec, ShaderCode,
    ShaderProgram, Size, TexelFormat, TextureDesc, UniformValue, Vertex, Viewport,
};

#[derive(Debug, Default)]
pub struct Live {
    pub textures: Cell<usize>,
    pub buffers: Cell<usize>,
    pub programs: Cell<usize>,
}

impl Live {
    pub fn total(&self) -> usize {
        self.textures.get() + self.buffers.get() + self.programs.get()
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Texture,
    Buffer,
    Program,
}

#[derive(Debug)]
struct Guard {
    kind: Kind,
    live: Rc<Live>,
}

impl Guard {
    fn new(kind: Kind, live: &Rc<Live>) -> Self {
        let counter = Self::counter(kind, live);
        counter.set(counter.get() + 1);
        Self {
            kind,
            live: Rc::clone(live),
        }
    }

    fn counter(kind: Kind, live: &Live) -> &Cell<usize> {
        match kind {
            Kind::Texture => &live.textures,
            Kind::Buffer => &live.buffers,
            Kind::Program => &live.programs,
        }
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let counter = Self::counter(self.kind, &self.live);
        counter.set(counter.get() - 1);
    }
}

#[derive(Debug)]
pub struct FakeTexture {
    pub id: usize,
    pub size: Size,
    pub format: TexelFormat,
    _guard: Guard,
}

#[derive(Debug)]
pub struct FakeBuffer {
    pub id: usize,
    _guard: Guard,
}

#[derive(Debug)]
pub struct FakeProgram {
    pub label: String,
    samplers: BTreeMap<String, u32>,
    streams: BTreeMap<String, u32>,
    uniforms: BTreeSet<String>,
    pub values: BTreeMap<String, UniformValue>,
    _guard: Guard,
}

impl ShaderProgram for FakeProgram {
    fn set_parameter(&mut self, name: &str, value: UniformValue) -> bool {
        if self.uniforms.contains(name) {
            self.values.insert(name.to_string(), value);
            true
        } else {
            false
        }
    }

    fn sampler_slot(&self, name: &str) -> Option<u32> {
        self.samplers.get(name).copied()
    }

    fn attribute_stream(&self, name: &str) -> Option<u32> {
        self.streams.get(name).copied()
    }

    fn declared_inputs(&self) -> Vec<String> {
        self.samplers.keys().cloned().collect()
    }
}

/// Snapshot of the device state at one draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    pub program: String,
    /// Target texture id, `None` for the back buffer.
    pub target: Option<usize>,
    pub viewport: Option<Viewport>,
    pub textures: BTreeMap<u32, usize>,
    pub samplers: BTreeMap<u32, SamplerSpec>,
    /// Tag of the last upload into each bound texture; `None` when cleared or never uploaded.
    pub contents: BTreeMap<u32, Option<u8>>,
    pub streams: BTreeMap<u32, usize>,
    pub values: BTreeMap<String, UniformValue>,
}

impl Draw {
    pub fn value(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateTexture {
        id: usize,
        label: String,
        size: Size,
        format: TexelFormat,
    },
    CreateBuffer {
        id: usize,
    },
    /// `tag` is the first byte of the uploaded frame.
    Upload {
        texture: usize,
        tag: u8,
        size: Size,
    },
    ClearTexture(usize),
    ClearBackBuffer,
    WriteVertices {
        buffer: usize,
        vertices: [Vertex; 4],
    },
    Compile(String),
    Target(Option<usize>),
    SetViewport(Viewport),
    BindProgram(String),
    BindTexture {
        slot: u32,
        texture: usize,
    },
    UnbindTexture(u32),
    BindStream {
        stream: u32,
        buffer: usize,
    },
    UnbindStream(u32),
    Draw(Draw),
    Present,
    Reset,
    Recreate,
}

#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Fail the n-th texture allocation (1-based, counted over the device's lifetime).
    pub fail_texture_at: Option<usize>,
    /// Fail every texture allocation until the device is recreated.
    pub fail_textures_until_recreate: bool,
    /// Report loss on the n-th draw (1-based).
    pub lose_on_draw: Option<usize>,
    pub lose_on_present: bool,
    pub reset_fails: bool,
    pub recreate_fails: bool,
}

pub struct RecordingDevice {
    pub live: Rc<Live>,
    pub events: Vec<Event>,
    pub faults: Faults,
    pub resets: usize,
    pub recreates: usize,
    next_id: usize,
    textures_created: usize,
    draws: usize,
    lost: bool,
    target: Option<usize>,
    viewport: Option<Viewport>,
    program: Option<(String, BTreeMap<String, UniformValue>)>,
    bound_textures: BTreeMap<u32, (usize, SamplerSpec)>,
    bound_streams: BTreeMap<u32, usize>,
    contents: HashMap<usize, u8>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            live: Rc::new(Live::default()),
            events: Vec::new(),
            faults: Faults::default(),
            resets: 0,
            recreates: 0,
            next_id: 0,
            textures_created: 0,
            draws: 0,
            lost: false,
            target: None,
            viewport: None,
            program: None,
            bound_textures: BTreeMap::new(),
            bound_streams: BTreeMap::new(),
            contents: HashMap::new(),
        }
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self {
            faults,
            ..Self::new()
        }
    }

    /// Marks the device lost, as a driver reset would.
    pub fn lose(&mut self) {
        self.lost = true;
    }

    pub fn draws(&self) -> Vec<&Draw> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Draw(draw) => Some(draw),
                _ => None,
            })
            .collect()
    }

    pub fn textures_created(&self) -> Vec<(usize, &str, Size)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::CreateTexture { id, label, size, .. } => Some((*id, label.as_str(), *size)),
                _ => None,
            })
            .collect()
    }

    /// Id of the most recently created texture with `label`.
    pub fn texture_id(&self, label: &str) -> Option<usize> {
        self.textures_created()
            .into_iter()
            .rev()
            .find(|(_, name, _)| *name == label)
            .map(|(id, _, _)| id)
    }

    pub fn bound_texture_slots(&self) -> usize {
        self.bound_textures.len()
    }

    pub fn bound_stream_count(&self) -> usize {
        self.bound_streams.len()
    }

    fn id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost {
            Err(DeviceError::Lost)
        } else {
            Ok(())
        }
    }
}

fn parse_declarations(source: &str) -> Result<Declarations, String> {
    let mut decl = Declarations::default();
    for line in source.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["sampler", name, slot] => {
                let slot = slot.parse().map_err(|_| format!("bad slot '{slot}'"))?;
                decl.samplers.insert(name.to_string(), slot);
            }
            ["stream", name, stream] => {
                let stream = stream.parse().map_err(|_| format!("bad stream '{stream}'"))?;
                decl.streams.insert(name.to_string(), stream);
            }
            ["uniform", name] => {
                decl.uniforms.insert(name.to_string());
            }
            ["fail", ..] => return Err("declared failure".to_string()),
            other => return Err(format!("unknown declaration {other:?}")),
        }
    }
    Ok(decl)
}

#[derive(Debug, Default)]
struct Declarations {
    samplers: BTreeMap<String, u32>,
    streams: BTreeMap<String, u32>,
    uniforms: BTreeSet<String>,
}

impl GpuDevice for RecordingDevice {
    type Texture = FakeTexture;
    type VertexBuffer = FakeBuffer;
    type Program = FakeProgram;

    fn back_buffer_format(&self) -> TexelFormat {
        TexelFormat::Rgba8
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<FakeTexture, DeviceError> {
        self.check_lost()?;
        self.textures_created += 1;
        if self.faults.fail_textures_until_recreate
            || self.faults.fail_texture_at == Some(self.textures_created)
        {
            return Err(DeviceError::OutOfMemory);
        }
        let id = self.id();
        self.events.push(Event::CreateTexture {
            id,
            label: desc.label.to_string(),
            size: desc.size,
            format: desc.format,
        });
        Ok(FakeTexture {
            id,
            size: desc.size,
            format: desc.format,
            _guard: Guard::new(Kind::Texture, &self.live),
        })
    }

    fn upload_texture(&mut self, texture: &FakeTexture, frame: &Frame<'_>) -> Result<(), DeviceError> {
        self.check_lost()?;
        let tag = frame.data.first().copied().unwrap_or_default();
        self.contents.insert(texture.id, tag);
        self.events.push(Event::Upload {
            texture: texture.id,
            tag,
            size: frame.size(),
        });
        Ok(())
    }

    fn clear_texture(&mut self, texture: &FakeTexture) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.contents.remove(&texture.id);
        self.events.push(Event::ClearTexture(texture.id));
        Ok(())
    }

    fn create_vertex_buffer(&mut self, _label: &str) -> Result<FakeBuffer, DeviceError> {
        self.check_lost()?;
        let id = self.id();
        self.events.push(Event::CreateBuffer { id });
        Ok(FakeBuffer {
            id,
            _guard: Guard::new(Kind::Buffer, &self.live),
        })
    }

    fn write_vertices(&mut self, buffer: &FakeBuffer, vertices: &[Vertex; 4]) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.events.push(Event::WriteVertices {
            buffer: buffer.id,
            vertices: *vertices,
        });
        Ok(())
    }

    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<FakeProgram, DeviceError> {
        self.check_lost()?;
        let decl = match desc.code {
            ShaderCode::Stock => parse_declarations("sampler IN.texture 0\nuniform modelViewProj"),
            ShaderCode::Text { source, .. } => parse_declarations(source),
        }
        .map_err(|message| DeviceError::Compile {
            label: desc.label.to_string(),
            message,
        })?;
        self.events.push(Event::Compile(desc.label.to_string()));
        Ok(FakeProgram {
            label: desc.label.to_string(),
            samplers: decl.samplers,
            streams: decl.streams,
            uniforms: decl.uniforms,
            values: BTreeMap::new(),
            _guard: Guard::new(Kind::Program, &self.live),
        })
    }

    fn set_render_target(&mut self, target: RenderTarget<'_, FakeTexture>) {
        self.target = match target {
            RenderTarget::BackBuffer => None,
            RenderTarget::Texture(texture) => Some(texture.id),
        };
        self.events.push(Event::Target(self.target));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = Some(viewport);
        self.events.push(Event::SetViewport(viewport));
    }

    fn clear_back_buffer(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.events.push(Event::ClearBackBuffer);
        Ok(())
    }

    fn bind_program(&mut self, program: &FakeProgram) {
        self.program = Some((program.label.clone(), program.values.clone()));
        self.events.push(Event::BindProgram(program.label.clone()));
    }

    fn bind_texture(&mut self, slot: u32, texture: &FakeTexture, sampler: SamplerSpec) {
        self.bound_textures.insert(slot, (texture.id, sampler));
        self.events.push(Event::BindTexture {
            slot,
            texture: texture.id,
        });
    }

    fn unbind_texture(&mut self, slot: u32) {
        self.bound_textures.remove(&slot);
        self.events.push(Event::UnbindTexture(slot));
    }

    fn bind_vertex_stream(&mut self, stream: u32, buffer: &FakeBuffer) {
        self.bound_streams.insert(stream, buffer.id);
        self.events.push(Event::BindStream {
            stream,
            buffer: buffer.id,
        });
    }

    fn unbind_vertex_stream(&mut self, stream: u32) {
        self.bound_streams.remove(&stream);
        self.events.push(Event::UnbindStream(stream));
    }

    fn draw_quad(&mut self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.draws += 1;
        if self.faults.lose_on_draw == Some(self.draws) {
            self.lost = true;
            return Err(DeviceError::Lost);
        }
        let Some((program, values)) = self.program.clone() else {
            return Err(DeviceError::Unsupported("draw without a program".into()));
        };
        let draw = Draw {
            program,
            target: self.target,
            viewport: self.viewport,
            textures: self.bound_textures.iter().map(|(slot, (id, _))| (*slot, *id)).collect(),
            samplers: self
                .bound_textures
                .iter()
                .map(|(slot, (_, sampler))| (*slot, *sampler))
                .collect(),
            contents: self
                .bound_textures
                .iter()
                .map(|(slot, (id, _))| (*slot, self.contents.get(id).copied()))
                .collect(),
            streams: self.bound_streams.clone(),
            values,
        };
        self.events.push(Event::Draw(draw));
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        if self.faults.lose_on_present {
            self.lost = true;
        }
        self.check_lost()?;
        self.events.push(Event::Present);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        self.resets += 1;
        self.events.push(Event::Reset);
        if self.faults.reset_fails {
            return Err(DeviceError::Lost);
        }
        self.lost = false;
        self.faults.lose_on_present = false;
        Ok(())
    }

    fn recreate(&mut self) -> Result<(), DeviceError> {
        self.recreates += 1;
        self.events.push(Event::Recreate);
        if self.faults.recreate_fails {
            return Err(DeviceError::Other(anyhow::anyhow!("no adapter")));
        }
        self.lost = false;
        self.faults.lose_on_present = false;
        self.faults.fail_textures_until_recreate = false;
        self.target = None;
        self.program = None;
        self.bound_textures.clear();
        self.bound_streams.clear();
        self.contents.clear();
        Ok(())
    }
}

/// Directory of declaration files used as pass programs.
pub struct Programs {
    dir: tempfile::TempDir,
}

impl Programs {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn write(&self, name: &str, declarations: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, declarations).expect("write program declarations");
        path
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a small RGBA PNG for use as a lookup texture.
    pub fn write_png(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.dir.path().join(name);
        image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .expect("write png");
        path
    }
}

/// An XRGB8888 frame whose every byte is `tag`.
pub fn frame_data(size: Size, tag: u8) -> Vec<u8> {
    vec![tag; size.width as usize * size.height as usize * 4]
}

pub fn frame(data: &[u8], size: Size) -> Frame<'_> {
    Frame::new(data, size.width, size.height, size.width as usize * 4)
}
