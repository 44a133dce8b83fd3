//! A recording [`Gpu`] for tests: no context, every call is logged.
//!
//! Linked programs expose the uniforms and attributes declared in their
//! sources, so the registry and render node behave as they would on a driver
//! that keeps every declared uniform active.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use doodle_core::{DoodleError, SamplerParams, UniformType, UniformValue};

use crate::gpu::{
    ActiveUniform, BufferId, FramebufferId, Gpu, PixelFormat, ProgramId, Region, ShaderId,
    ShaderStage, TextureId, TextureUnit, UniformKind, UniformLocation,
};

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRecord {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub full_uploads: u32,
    pub sub_uploads: u32,
    pub mipmaps: u32,
    pub sampler: Option<SamplerParams>,
    pub flip_y: bool,
}

impl Default for TextureRecord {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgba,
            full_uploads: 0,
            sub_uploads: 0,
            mipmaps: 0,
            sampler: None,
            flip_y: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformUpload {
    pub program: Option<ProgramId>,
    pub name: String,
    pub value: UniformValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: Option<ProgramId>,
    pub framebuffer: Option<FramebufferId>,
    pub vertex_count: i32,
    /// Texture bound on each unit at draw time.
    pub bindings: Vec<(TextureUnit, TextureId)>,
}

#[derive(Debug, Default)]
struct ProgramRecord {
    uniforms: Vec<ActiveUniform>,
    attributes: Vec<String>,
}

#[derive(Debug, Default)]
struct Recorder {
    next_id: u32,
    textures: HashMap<TextureId, TextureRecord>,
    framebuffers: HashMap<FramebufferId, TextureId>,
    shaders: HashMap<ShaderId, String>,
    programs: HashMap<ProgramId, ProgramRecord>,
    buffers: HashMap<BufferId, usize>,
    location_names: HashMap<UniformLocation, String>,

    active_unit: TextureUnit,
    unit_bindings: HashMap<TextureUnit, TextureId>,
    bound_framebuffer: Option<FramebufferId>,
    current_program: Option<ProgramId>,

    uniform_uploads: Vec<UniformUpload>,
    draws: Vec<DrawCall>,
    clears: Vec<Option<FramebufferId>>,
    viewports: Vec<[i32; 4]>,
    drawable: (u32, u32),
    blending: bool,
    clear_color: [f32; 4],

    fail_marker: Option<String>,
    missing_extensions: HashSet<String>,
}

impl Recorder {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn bound_texture(&self) -> Option<TextureId> {
        self.unit_bindings.get(&self.active_unit).copied()
    }
}

/// Clones share one log, so a test can hand a clone to a [`crate::Renderer`]
/// and keep inspecting it.
#[derive(Debug, Default, Clone)]
pub struct RecordingGpu {
    inner: Rc<RefCell<Recorder>>,
}

fn uniform_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*uniform\s+(?:(?:lowp|mediump|highp)\s+)?(\w+)\s+(\w+)\s*(?:\[\s*\d+\s*\])?\s*;")
            .expect("static regex")
    })
}

fn attribute_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:attribute|in)\s+(?:(?:lowp|mediump|highp)\s+)?\w+\s+(\w+)\s*;")
            .expect("static regex")
    })
}

impl RecordingGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shader sources containing `marker` fail to compile from now on.
    pub fn fail_compile_on(&self, marker: impl Into<String>) {
        self.inner.borrow_mut().fail_marker = Some(marker.into());
    }

    pub fn remove_extension(&self, name: impl Into<String>) {
        self.inner.borrow_mut().missing_extensions.insert(name.into());
    }

    pub fn draw_count(&self) -> usize {
        self.inner.borrow().draws.len()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.inner.borrow().draws.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.inner.borrow().uniform_uploads.len()
    }

    pub fn uploads(&self) -> Vec<UniformUpload> {
        self.inner.borrow().uniform_uploads.clone()
    }

    pub fn uploads_named(&self, name: &str) -> Vec<UniformValue> {
        self.inner
            .borrow()
            .uniform_uploads
            .iter()
            .filter(|u| u.name == name)
            .map(|u| u.value)
            .collect()
    }

    pub fn last_upload(&self, name: &str) -> Option<UniformValue> {
        self.uploads_named(name).last().copied()
    }

    pub fn texture(&self, id: TextureId) -> Option<TextureRecord> {
        self.inner.borrow().textures.get(&id).cloned()
    }

    pub fn live_textures(&self) -> usize {
        self.inner.borrow().textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.inner.borrow().framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.inner.borrow().programs.len()
    }

    /// Color texture attached to `fb`.
    pub fn framebuffer_texture(&self, fb: FramebufferId) -> Option<TextureId> {
        self.inner.borrow().framebuffers.get(&fb).copied()
    }

    pub fn clears(&self) -> Vec<Option<FramebufferId>> {
        self.inner.borrow().clears.clone()
    }

    pub fn viewports(&self) -> Vec<[i32; 4]> {
        self.inner.borrow().viewports.clone()
    }

    pub fn drawable_size(&self) -> (u32, u32) {
        self.inner.borrow().drawable
    }

    pub fn blending_enabled(&self) -> bool {
        self.inner.borrow().blending
    }

    pub fn clear_color_value(&self) -> [f32; 4] {
        self.inner.borrow().clear_color
    }

    /// Forget recorded calls; object state is kept.
    pub fn reset_log(&self) {
        let mut r = self.inner.borrow_mut();
        r.uniform_uploads.clear();
        r.draws.clear();
        r.clears.clear();
        r.viewports.clear();
    }
}

fn kind_for(glsl: &str) -> UniformKind {
    match glsl {
        "sampler2D" | "samplerExternalOES" => UniformKind::Sampler,
        other => match UniformType::parse(other) {
            Some(t) => UniformKind::Value(t),
            None => UniformKind::Unsupported(0),
        },
    }
}

impl Gpu for RecordingGpu {
    fn create_texture(&self) -> Result<TextureId, DoodleError> {
        let mut r = self.inner.borrow_mut();
        let id = TextureId(r.next());
        r.textures.insert(id, TextureRecord::default());
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut r = self.inner.borrow_mut();
        r.textures.remove(&texture);
        r.unit_bindings.retain(|_, t| *t != texture);
    }

    fn active_texture(&self, unit: TextureUnit) {
        self.inner.borrow_mut().active_unit = unit;
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        let mut r = self.inner.borrow_mut();
        let unit = r.active_unit;
        match texture {
            Some(t) => {
                r.unit_bindings.insert(unit, t);
            }
            None => {
                r.unit_bindings.remove(&unit);
            }
        }
    }

    fn set_sampler(&self, params: &SamplerParams) {
        let mut r = self.inner.borrow_mut();
        if let Some(t) = r.bound_texture() {
            if let Some(rec) = r.textures.get_mut(&t) {
                rec.sampler = Some(*params);
            }
        }
    }

    fn tex_image_2d(
        &self,
        format: PixelFormat,
        width: u32,
        height: u32,
        _pixels: Option<&[u8]>,
        flip_y: bool,
    ) {
        let mut r = self.inner.borrow_mut();
        if let Some(t) = r.bound_texture() {
            if let Some(rec) = r.textures.get_mut(&t) {
                rec.width = width;
                rec.height = height;
                rec.format = format;
                rec.flip_y = flip_y;
                rec.full_uploads += 1;
            }
        }
    }

    fn tex_sub_image_2d(&self, _format: PixelFormat, _region: Region, _pixels: &[u8], _flip_y: bool) {
        let mut r = self.inner.borrow_mut();
        if let Some(t) = r.bound_texture() {
            if let Some(rec) = r.textures.get_mut(&t) {
                rec.sub_uploads += 1;
            }
        }
    }

    fn generate_mipmap(&self) {
        let mut r = self.inner.borrow_mut();
        if let Some(t) = r.bound_texture() {
            if let Some(rec) = r.textures.get_mut(&t) {
                rec.mipmaps += 1;
            }
        }
    }

    fn create_framebuffer(&self, texture: TextureId) -> Result<FramebufferId, DoodleError> {
        let mut r = self.inner.borrow_mut();
        if !r.textures.contains_key(&texture) {
            return Err(DoodleError::GpuCreate("framebuffer incomplete: no texture".into()));
        }
        let id = FramebufferId(r.next());
        r.framebuffers.insert(id, texture);
        Ok(id)
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut r = self.inner.borrow_mut();
        r.framebuffers.remove(&framebuffer);
        if r.bound_framebuffer == Some(framebuffer) {
            r.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&self, framebuffer: Option<FramebufferId>) {
        self.inner.borrow_mut().bound_framebuffer = framebuffer;
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.inner.borrow_mut().viewports.push([x, y, width, height]);
    }

    fn clear_color(&self, rgba: [f32; 4]) {
        self.inner.borrow_mut().clear_color = rgba;
    }

    fn clear(&self) {
        let mut r = self.inner.borrow_mut();
        let fb = r.bound_framebuffer;
        r.clears.push(fb);
    }

    fn enable_alpha_blending(&self) {
        self.inner.borrow_mut().blending = true;
    }

    fn resize_drawable(&self, width: u32, height: u32) {
        self.inner.borrow_mut().drawable = (width, height);
    }

    fn read_pixels(&self, _x: i32, _y: i32, _width: u32, _height: u32, out: &mut [u8]) {
        out.fill(0);
    }

    fn create_shader(&self, _stage: ShaderStage) -> Result<ShaderId, DoodleError> {
        let mut r = self.inner.borrow_mut();
        let id = ShaderId(r.next());
        r.shaders.insert(id, String::new());
        Ok(id)
    }

    fn compile_shader(&self, shader: ShaderId, source: &str) -> bool {
        let mut r = self.inner.borrow_mut();
        r.shaders.insert(shader, source.to_string());
        match &r.fail_marker {
            Some(m) => !source.contains(m.as_str()),
            None => true,
        }
    }

    fn shader_info_log(&self, _shader: ShaderId) -> String {
        "ERROR: 0:1: recording stub rejected source".to_string()
    }

    fn delete_shader(&self, shader: ShaderId) {
        self.inner.borrow_mut().shaders.remove(&shader);
    }

    fn create_program(&self) -> Result<ProgramId, DoodleError> {
        let mut r = self.inner.borrow_mut();
        let id = ProgramId(r.next());
        r.programs.insert(id, ProgramRecord::default());
        Ok(id)
    }

    fn link_program(&self, program: ProgramId, vertex: ShaderId, fragment: ShaderId) -> bool {
        let mut r = self.inner.borrow_mut();
        let sources = [
            r.shaders.get(&vertex).cloned().unwrap_or_default(),
            r.shaders.get(&fragment).cloned().unwrap_or_default(),
        ];

        let mut seen = HashSet::new();
        let mut uniforms = Vec::new();
        for src in &sources {
            for cap in uniform_decl().captures_iter(src) {
                let name = cap[2].to_string();
                if !seen.insert(name.clone()) {
                    continue;
                }
                let location = UniformLocation(r.next());
                r.location_names.insert(location, name.clone());
                uniforms.push(ActiveUniform {
                    name,
                    kind: kind_for(&cap[1]),
                    location,
                });
            }
        }
        let attributes = attribute_decl()
            .captures_iter(&sources[0])
            .map(|c| c[1].to_string())
            .collect();

        if let Some(rec) = r.programs.get_mut(&program) {
            rec.uniforms = uniforms;
            rec.attributes = attributes;
        }
        true
    }

    fn program_info_log(&self, _program: ProgramId) -> String {
        String::new()
    }

    fn delete_program(&self, program: ProgramId) {
        let mut r = self.inner.borrow_mut();
        r.programs.remove(&program);
        if r.current_program == Some(program) {
            r.current_program = None;
        }
    }

    fn use_program(&self, program: Option<ProgramId>) {
        self.inner.borrow_mut().current_program = program;
    }

    fn active_uniforms(&self, program: ProgramId) -> Vec<ActiveUniform> {
        self.inner
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.inner
            .borrow()
            .programs
            .get(&program)?
            .attributes
            .iter()
            .position(|a| a == name)
            .map(|i| i as u32)
    }

    fn upload_uniform(&self, location: UniformLocation, value: &UniformValue) {
        let mut r = self.inner.borrow_mut();
        let name = r.location_names.get(&location).cloned().unwrap_or_default();
        let program = r.current_program;
        r.uniform_uploads.push(UniformUpload {
            program,
            name,
            value: *value,
        });
    }

    fn create_vertex_buffer(&self, vertices: &[f32]) -> Result<BufferId, DoodleError> {
        let mut r = self.inner.borrow_mut();
        let id = BufferId(r.next());
        r.buffers.insert(id, vertices.len());
        Ok(id)
    }

    fn delete_buffer(&self, buffer: BufferId) {
        self.inner.borrow_mut().buffers.remove(&buffer);
    }

    fn bind_vertex_buffer(&self, _buffer: BufferId, _attribute: u32) {}

    fn draw_triangles(&self, vertex_count: i32) {
        let mut r = self.inner.borrow_mut();
        let mut bindings: Vec<(TextureUnit, TextureId)> =
            r.unit_bindings.iter().map(|(u, t)| (*u, *t)).collect();
        bindings.sort();
        let call = DrawCall {
            program: r.current_program,
            framebuffer: r.bound_framebuffer,
            vertex_count,
            bindings,
        };
        r.draws.push(call);
    }

    fn has_extension(&self, name: &str) -> bool {
        !self.inner.borrow().missing_extensions.contains(name)
    }
}
