//! doodle runtime (glow/OpenGL backend)
//
// Implements the `Gpu` seam over a glow context. The host owns the context and
// the window; this crate only issues GL calls.
//
// Shaders are GLSL ES 1.00 (`attribute`, `gl_FragColor`), so the context must
// be GLES 2/3, WebGL, or a desktop compatibility profile.
#![allow(clippy::missing_safety_doc)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use glow::HasContext;

use doodle_core::{DoodleError, Filter, SamplerParams, UniformType, UniformValue, Wrap};
use doodle_runtime::{
    ActiveUniform, BufferId, FramebufferId, Gpu, PixelFormat, ProgramId, Region, ShaderId, ShaderStage,
    TextureId, TextureUnit, UniformKind, UniformLocation,
};

const FLOAT_TEXTURE_EXTENSIONS: [&str; 4] = [
    "OES_texture_float",
    "OES_texture_float_linear",
    "OES_texture_half_float",
    "OES_texture_half_float_linear",
];

/// Id -> GL object table.
#[derive(Debug)]
struct Handles<T> {
    next: u32,
    map: HashMap<u32, T>,
}

impl<T> Default for Handles<T> {
    fn default() -> Self {
        Self {
            next: 1,
            map: HashMap::new(),
        }
    }
}

impl<T: Clone> Handles<T> {
    fn insert(&mut self, value: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.map.insert(id, value);
        id
    }

    fn get(&self, id: u32) -> Option<T> {
        self.map.get(&id).cloned()
    }

    fn remove(&mut self, id: u32) -> Option<T> {
        self.map.remove(&id)
    }
}

/// Uniform locations, grouped by the program they were queried from.
#[derive(Debug)]
struct Locations<T> {
    handles: Handles<T>,
    by_program: HashMap<u32, Vec<u32>>,
}

impl<T> Default for Locations<T> {
    fn default() -> Self {
        Self {
            handles: Handles::default(),
            by_program: HashMap::new(),
        }
    }
}

impl<T: Clone> Locations<T> {
    fn insert(&mut self, program: u32, location: T) -> u32 {
        let id = self.handles.insert(location);
        self.by_program.entry(program).or_default().push(id);
        id
    }

    fn get(&self, id: u32) -> Option<T> {
        self.handles.get(id)
    }

    /// Forget every location of `program`. Returns how many were dropped.
    fn release(&mut self, program: u32) -> usize {
        let ids = self.by_program.remove(&program).unwrap_or_default();
        for id in &ids {
            self.handles.remove(*id);
        }
        ids.len()
    }
}

#[derive(Debug, Default)]
struct Objects {
    textures: Handles<glow::NativeTexture>,
    framebuffers: Handles<glow::NativeFramebuffer>,
    shaders: Handles<glow::NativeShader>,
    programs: Handles<glow::NativeProgram>,
    buffers: Handles<glow::NativeBuffer>,
    locations: Locations<glow::NativeUniformLocation>,
}

pub struct GlowGpu {
    gl: glow::Context,
    objects: RefCell<Objects>,
    vao: Option<glow::NativeVertexArray>,
    embedded: bool,
    drawable: Cell<(u32, u32)>,
}

impl std::fmt::Debug for GlowGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowGpu")
            .field("embedded", &self.embedded)
            .field("drawable", &self.drawable.get())
            .field("objects", &self.objects)
            .finish()
    }
}

fn gl_wrap(w: Wrap) -> i32 {
    (match w {
        Wrap::Repeat => glow::REPEAT,
        Wrap::ClampToEdge => glow::CLAMP_TO_EDGE,
        Wrap::MirroredRepeat => glow::MIRRORED_REPEAT,
    }) as i32
}

fn gl_filter(f: Filter) -> i32 {
    (match f {
        Filter::Nearest => glow::NEAREST,
        Filter::Linear => glow::LINEAR,
        Filter::NearestMipmapNearest => glow::NEAREST_MIPMAP_NEAREST,
        Filter::LinearMipmapNearest => glow::LINEAR_MIPMAP_NEAREST,
        Filter::NearestMipmapLinear => glow::NEAREST_MIPMAP_LINEAR,
        Filter::LinearMipmapLinear => glow::LINEAR_MIPMAP_LINEAR,
    }) as i32
}

fn uniform_kind(utype: u32) -> UniformKind {
    match utype {
        glow::FLOAT => UniformKind::Value(UniformType::Float),
        glow::FLOAT_VEC2 => UniformKind::Value(UniformType::Vec2),
        glow::FLOAT_VEC3 => UniformKind::Value(UniformType::Vec3),
        glow::FLOAT_VEC4 => UniformKind::Value(UniformType::Vec4),
        glow::INT => UniformKind::Value(UniformType::Int),
        glow::SAMPLER_2D => UniformKind::Sampler,
        other => UniformKind::Unsupported(other),
    }
}

/// Reverse the row order of a tightly packed image.
fn flip_rows(pixels: &[u8], row_bytes: usize) -> Vec<u8> {
    if row_bytes == 0 {
        return pixels.to_vec();
    }
    pixels
        .chunks_exact(row_bytes)
        .rev()
        .flat_map(|row| row.iter().copied())
        .collect()
}

impl GlowGpu {
    /// Wrap a context. The context must be current on this thread for as long
    /// as the returned value is used.
    pub unsafe fn new(gl: glow::Context) -> Self {
        let version = gl.version();
        let embedded = version.is_embedded;
        tracing::info!(
            major = version.major,
            minor = version.minor,
            embedded,
            vendor = %version.vendor_info,
            "GL context"
        );

        gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);

        let vao = if version.major >= 3 {
            match gl.create_vertex_array() {
                Ok(vao) => {
                    gl.bind_vertex_array(Some(vao));
                    Some(vao)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "create_vertex_array failed");
                    None
                }
            }
        } else {
            None
        };

        Self {
            gl,
            objects: RefCell::new(Objects::default()),
            vao,
            embedded,
            drawable: Cell::new((0, 0)),
        }
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// Size the host should give the default framebuffer.
    pub fn drawable_size(&self) -> (u32, u32) {
        self.drawable.get()
    }

    /// Desktop core profiles have no LUMINANCE; use RED with a swizzle instead.
    fn luminance_is_native(&self) -> bool {
        self.embedded
    }

    /// (internal format, format) for uploads.
    fn formats(&self, format: PixelFormat) -> (i32, u32) {
        match format {
            PixelFormat::Rgba => (glow::RGBA as i32, glow::RGBA),
            PixelFormat::Luminance if self.luminance_is_native() => (glow::LUMINANCE as i32, glow::LUMINANCE),
            PixelFormat::Luminance => (glow::R8 as i32, glow::RED),
        }
    }

    unsafe fn swizzle_luminance(&self) {
        if self.luminance_is_native() {
            return;
        }
        let gl = &self.gl;
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_R, glow::RED as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_G, glow::RED as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_B, glow::RED as i32);
        gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_A, glow::ONE as i32);
    }

    fn texture(&self, id: TextureId) -> Option<glow::NativeTexture> {
        self.objects.borrow().textures.get(id.0)
    }

    fn program(&self, id: ProgramId) -> Option<glow::NativeProgram> {
        self.objects.borrow().programs.get(id.0)
    }

    fn shader(&self, id: ShaderId) -> Option<glow::NativeShader> {
        self.objects.borrow().shaders.get(id.0)
    }

    /// Release the shared vertex array. Objects created through [`Gpu`] are
    /// owned by their runtime types and freed there.
    pub unsafe fn destroy(&mut self) {
        if let Some(vao) = self.vao.take() {
            self.gl.delete_vertex_array(vao);
        }
    }
}

impl Gpu for GlowGpu {
    fn create_texture(&self) -> Result<TextureId, DoodleError> {
        let tex = unsafe { self.gl.create_texture() }
            .map_err(|e| DoodleError::GpuCreate(format!("create_texture failed: {e:?}")))?;
        Ok(TextureId(self.objects.borrow_mut().textures.insert(tex)))
    }

    fn delete_texture(&self, texture: TextureId) {
        if let Some(tex) = self.objects.borrow_mut().textures.remove(texture.0) {
            unsafe { self.gl.delete_texture(tex) };
        }
    }

    fn active_texture(&self, unit: TextureUnit) {
        if unit.index() >= TextureUnit::COUNT {
            tracing::warn!(unit = unit.index(), "texture unit out of range");
            return;
        }
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit.index()) };
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        let tex = texture.and_then(|id| self.texture(id));
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, tex) };
    }

    fn set_sampler(&self, params: &SamplerParams) {
        let gl = &self.gl;
        unsafe {
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, gl_wrap(params.wrap_s));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, gl_wrap(params.wrap_t));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, gl_filter(params.min_filter));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, gl_filter(params.mag_filter));
        }
    }

    fn tex_image_2d(&self, format: PixelFormat, width: u32, height: u32, pixels: Option<&[u8]>, flip_y: bool) {
        let (internal, fmt) = self.formats(format);
        let flipped;
        let data = match pixels {
            Some(p) if flip_y => {
                flipped = flip_rows(p, width as usize * format.channels());
                Some(flipped.as_slice())
            }
            other => other,
        };
        unsafe {
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                width as i32,
                height as i32,
                0,
                fmt,
                glow::UNSIGNED_BYTE,
                data,
            );
            if format == PixelFormat::Luminance {
                self.swizzle_luminance();
            }
        }
    }

    fn tex_sub_image_2d(&self, format: PixelFormat, region: Region, pixels: &[u8], flip_y: bool) {
        let (_, fmt) = self.formats(format);
        let flipped;
        let data = if flip_y {
            flipped = flip_rows(pixels, region.width as usize * format.channels());
            flipped.as_slice()
        } else {
            pixels
        };
        unsafe {
            self.gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                region.x as i32,
                region.y as i32,
                region.width as i32,
                region.height as i32,
                fmt,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(data),
            );
        }
    }

    fn generate_mipmap(&self) {
        unsafe { self.gl.generate_mipmap(glow::TEXTURE_2D) };
    }

    fn create_framebuffer(&self, texture: TextureId) -> Result<FramebufferId, DoodleError> {
        let tex = self
            .texture(texture)
            .ok_or_else(|| DoodleError::GpuCreate(format!("unknown texture {texture:?}")))?;
        let gl = &self.gl;
        unsafe {
            let fbo = gl
                .create_framebuffer()
                .map_err(|e| DoodleError::GpuCreate(format!("create_framebuffer failed: {e:?}")))?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, Some(tex), 0);

            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                return Err(DoodleError::GpuCreate(format!("framebuffer incomplete: 0x{status:x}")));
            }
            Ok(FramebufferId(self.objects.borrow_mut().framebuffers.insert(fbo)))
        }
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        if let Some(fbo) = self.objects.borrow_mut().framebuffers.remove(framebuffer.0) {
            unsafe { self.gl.delete_framebuffer(fbo) };
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        let fbo = framebuffer.and_then(|id| self.objects.borrow().framebuffers.get(id.0));
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, fbo) };
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { self.gl.viewport(x, y, width, height) };
    }

    fn clear_color(&self, [r, g, b, a]: [f32; 4]) {
        unsafe { self.gl.clear_color(r, g, b, a) };
    }

    fn clear(&self) {
        unsafe { self.gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT) };
    }

    fn enable_alpha_blending(&self) {
        unsafe {
            self.gl.enable(glow::BLEND);
            self.gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        }
    }

    fn resize_drawable(&self, width: u32, height: u32) {
        tracing::debug!(width, height, "drawable resize requested");
        self.drawable.set((width, height));
    }

    fn read_pixels(&self, x: i32, y: i32, width: u32, height: u32, out: &mut [u8]) {
        unsafe {
            self.gl.read_pixels(
                x,
                y,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(out),
            );
        }
    }

    fn create_shader(&self, stage: ShaderStage) -> Result<ShaderId, DoodleError> {
        let ty = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = unsafe { self.gl.create_shader(ty) }
            .map_err(|e| DoodleError::GpuCreate(format!("create_shader({stage:?}) failed: {e:?}")))?;
        Ok(ShaderId(self.objects.borrow_mut().shaders.insert(shader)))
    }

    fn compile_shader(&self, shader: ShaderId, source: &str) -> bool {
        let Some(sh) = self.shader(shader) else {
            return false;
        };
        unsafe {
            self.gl.shader_source(sh, source);
            self.gl.compile_shader(sh);
            self.gl.get_shader_compile_status(sh)
        }
    }

    fn shader_info_log(&self, shader: ShaderId) -> String {
        self.shader(shader)
            .map(|sh| unsafe { self.gl.get_shader_info_log(sh) })
            .unwrap_or_default()
    }

    fn delete_shader(&self, shader: ShaderId) {
        if let Some(sh) = self.objects.borrow_mut().shaders.remove(shader.0) {
            unsafe { self.gl.delete_shader(sh) };
        }
    }

    fn create_program(&self) -> Result<ProgramId, DoodleError> {
        let program = unsafe { self.gl.create_program() }
            .map_err(|e| DoodleError::GpuCreate(format!("create_program failed: {e:?}")))?;
        Ok(ProgramId(self.objects.borrow_mut().programs.insert(program)))
    }

    fn link_program(&self, program: ProgramId, vertex: ShaderId, fragment: ShaderId) -> bool {
        let (Some(p), Some(vs), Some(fs)) = (self.program(program), self.shader(vertex), self.shader(fragment)) else {
            return false;
        };
        let gl = &self.gl;
        unsafe {
            gl.attach_shader(p, vs);
            gl.attach_shader(p, fs);
            gl.bind_attrib_location(p, 0, "position");
            gl.link_program(p);
            gl.detach_shader(p, vs);
            gl.detach_shader(p, fs);
            gl.get_program_link_status(p)
        }
    }

    fn program_info_log(&self, program: ProgramId) -> String {
        self.program(program)
            .map(|p| unsafe { self.gl.get_program_info_log(p) })
            .unwrap_or_default()
    }

    fn delete_program(&self, program: ProgramId) {
        let mut objects = self.objects.borrow_mut();
        let released = objects.locations.release(program.0);
        if let Some(p) = objects.programs.remove(program.0) {
            tracing::trace!(program = program.0, locations = released, "program deleted");
            unsafe { self.gl.delete_program(p) };
        }
    }

    fn use_program(&self, program: Option<ProgramId>) {
        let p = program.and_then(|id| self.program(id));
        unsafe { self.gl.use_program(p) };
    }

    fn active_uniforms(&self, program: ProgramId) -> Vec<ActiveUniform> {
        let Some(p) = self.program(program) else {
            return Vec::new();
        };
        let gl = &self.gl;
        self.objects.borrow_mut().locations.release(program.0);
        let count = unsafe { gl.get_active_uniforms(p) };
        let mut out = Vec::with_capacity(count as usize);
        for index in 0..count {
            let Some(info) = (unsafe { gl.get_active_uniform(p, index) }) else {
                continue;
            };
            let Some(loc) = (unsafe { gl.get_uniform_location(p, &info.name) }) else {
                continue;
            };
            let location = UniformLocation(self.objects.borrow_mut().locations.insert(program.0, loc));
            out.push(ActiveUniform {
                name: info.name,
                kind: uniform_kind(info.utype),
                location,
            });
        }
        out
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let p = self.program(program)?;
        unsafe { self.gl.get_attrib_location(p, name) }
    }

    fn upload_uniform(&self, location: UniformLocation, value: &UniformValue) {
        let Some(loc) = self.objects.borrow().locations.get(location.0) else {
            return;
        };
        let gl = &self.gl;
        unsafe {
            match *value {
                UniformValue::Float(v) => gl.uniform_1_f32(Some(&loc), v),
                UniformValue::Int(v) => gl.uniform_1_i32(Some(&loc), v),
                UniformValue::Vec2([x, y]) => gl.uniform_2_f32(Some(&loc), x, y),
                UniformValue::Vec3([x, y, z]) => gl.uniform_3_f32(Some(&loc), x, y, z),
                UniformValue::Vec4([x, y, z, w]) => gl.uniform_4_f32(Some(&loc), x, y, z, w),
            }
        }
    }

    fn create_vertex_buffer(&self, vertices: &[f32]) -> Result<BufferId, DoodleError> {
        let gl = &self.gl;
        let buffer = unsafe { gl.create_buffer() }
            .map_err(|e| DoodleError::GpuCreate(format!("create_buffer failed: {e:?}")))?;
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(vertices), glow::STATIC_DRAW);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        Ok(BufferId(self.objects.borrow_mut().buffers.insert(buffer)))
    }

    fn delete_buffer(&self, buffer: BufferId) {
        if let Some(b) = self.objects.borrow_mut().buffers.remove(buffer.0) {
            unsafe { self.gl.delete_buffer(b) };
        }
    }

    fn bind_vertex_buffer(&self, buffer: BufferId, attribute: u32) {
        let Some(b) = self.objects.borrow().buffers.get(buffer.0) else {
            return;
        };
        let gl = &self.gl;
        unsafe {
            if let Some(vao) = self.vao {
                gl.bind_vertex_array(Some(vao));
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(b));
            gl.enable_vertex_attrib_array(attribute);
            gl.vertex_attrib_pointer_f32(attribute, 2, glow::FLOAT, false, 0, 0);
        }
    }

    fn draw_triangles(&self, vertex_count: i32) {
        unsafe { self.gl.draw_arrays(glow::TRIANGLES, 0, vertex_count) };
    }

    fn has_extension(&self, name: &str) -> bool {
        if !self.embedded && self.gl.version().major >= 3 && FLOAT_TEXTURE_EXTENSIONS.contains(&name) {
            return true;
        }
        let exts = self.gl.supported_extensions();
        exts.contains(name)
            || exts.contains(&format!("GL_{name}"))
            || ["WEBKIT_", "MOZ_"].iter().any(|p| exts.contains(&format!("{p}{name}")))
    }
}
