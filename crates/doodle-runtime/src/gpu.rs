//! The GPU seam.
//!
//! Render code talks to a `&dyn Gpu` instead of a concrete context so the whole
//! graph can run against a recording stub. Handles are opaque newtypes; the
//! backend maps them to its native objects.

use doodle_core::{DoodleError, SamplerParams, UniformType, UniformValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Index of a texture unit. Backends translate it through a fixed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(pub u32);

impl TextureUnit {
    /// Units guaranteed by every backend (WebGL1 minimum is 8 for fragments;
    /// desktop GL exposes at least 16, the table covers 32).
    pub const COUNT: u32 = 32;

    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Luminance,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Rgba => 4,
            PixelFormat::Luminance => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Value(UniformType),
    Sampler,
    /// Types the runtime never writes (matrices, bools, arrays of structs...).
    Unsupported(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveUniform {
    pub name: String,
    pub kind: UniformKind,
    pub location: UniformLocation,
}

/// Upload region for texture updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

pub trait Gpu {
    // ---- textures ----
    fn create_texture(&self) -> Result<TextureId, DoodleError>;
    fn delete_texture(&self, texture: TextureId);
    fn active_texture(&self, unit: TextureUnit);
    /// Bind to `TEXTURE_2D` on the active unit.
    fn bind_texture(&self, texture: Option<TextureId>);
    /// Apply wrap/filter state to the bound texture.
    fn set_sampler(&self, params: &SamplerParams);
    /// Allocate and fill the bound texture. `pixels: None` allocates only.
    /// With `flip_y`, rows are uploaded bottom-up.
    fn tex_image_2d(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
        flip_y: bool,
    );
    fn tex_sub_image_2d(&self, format: PixelFormat, region: Region, pixels: &[u8], flip_y: bool);
    fn generate_mipmap(&self);

    // ---- framebuffers ----
    /// Create a framebuffer with `texture` as its color attachment and check completeness.
    fn create_framebuffer(&self, texture: TextureId) -> Result<FramebufferId, DoodleError>;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    /// `None` selects the shared drawable (default framebuffer).
    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear_color(&self, rgba: [f32; 4]);
    fn clear(&self);
    fn enable_alpha_blending(&self);
    /// Resize the shared drawable. Backends that do not own it may ignore this.
    fn resize_drawable(&self, width: u32, height: u32);
    /// Read RGBA8 pixels from the bound framebuffer (bottom-up rows).
    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32, out: &mut [u8]);

    // ---- programs ----
    fn create_shader(&self, stage: ShaderStage) -> Result<ShaderId, DoodleError>;
    /// Set source and compile. Returns the compile status.
    fn compile_shader(&self, shader: ShaderId, source: &str) -> bool;
    fn shader_info_log(&self, shader: ShaderId) -> String;
    fn delete_shader(&self, shader: ShaderId);
    fn create_program(&self) -> Result<ProgramId, DoodleError>;
    /// Attach, link, detach. Returns the link status.
    fn link_program(&self, program: ProgramId, vertex: ShaderId, fragment: ShaderId) -> bool;
    fn program_info_log(&self, program: ProgramId) -> String;
    /// Also invalidates the program's uniform locations.
    fn delete_program(&self, program: ProgramId);
    fn use_program(&self, program: Option<ProgramId>);
    /// Locations returned by an earlier call for the same program become stale.
    fn active_uniforms(&self, program: ProgramId) -> Vec<ActiveUniform>;
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    /// Upload to the program in use.
    fn upload_uniform(&self, location: UniformLocation, value: &UniformValue);

    // ---- geometry ----
    fn create_vertex_buffer(&self, vertices: &[f32]) -> Result<BufferId, DoodleError>;
    fn delete_buffer(&self, buffer: BufferId);
    /// Bind `buffer` as 2-component float positions on `attribute`.
    fn bind_vertex_buffer(&self, buffer: BufferId, attribute: u32);
    fn draw_triangles(&self, vertex_count: i32);

    /// True if the extension (or a vendor-prefixed variant) is available.
    fn has_extension(&self, name: &str) -> bool;
}

/// Compile and link a program. On failure every intermediate object is freed
/// and the driver log is returned in the error.
pub fn compile_program(gpu: &dyn Gpu, vert_src: &str, frag_src: &str) -> Result<ProgramId, DoodleError> {
    let vs = gpu.create_shader(ShaderStage::Vertex)?;
    if !gpu.compile_shader(vs, vert_src) {
        let log = gpu.shader_info_log(vs);
        gpu.delete_shader(vs);
        return Err(DoodleError::VertexCompile(log));
    }

    let fs = match gpu.create_shader(ShaderStage::Fragment) {
        Ok(fs) => fs,
        Err(e) => {
            gpu.delete_shader(vs);
            return Err(e);
        }
    };
    if !gpu.compile_shader(fs, frag_src) {
        let log = gpu.shader_info_log(fs);
        gpu.delete_shader(vs);
        gpu.delete_shader(fs);
        return Err(DoodleError::FragmentCompile(log));
    }

    let program = match gpu.create_program() {
        Ok(p) => p,
        Err(e) => {
            gpu.delete_shader(vs);
            gpu.delete_shader(fs);
            return Err(e);
        }
    };
    let linked = gpu.link_program(program, vs, fs);
    gpu.delete_shader(vs);
    gpu.delete_shader(fs);

    if !linked {
        let log = gpu.program_info_log(program);
        gpu.delete_program(program);
        return Err(DoodleError::Link(log));
    }

    Ok(program)
}
