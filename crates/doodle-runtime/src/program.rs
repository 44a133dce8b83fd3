//! Render nodes: one compiled program with its inputs and optional off-screen output.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use doodle_core::uniforms::PREVBUFFER;
use doodle_core::{SamplerParams, UniformState};
use doodle_loader::Liveness;

use crate::framebuffer::{Framebuffer, PingPong};
use crate::gpu::{compile_program, BufferId, Gpu, ProgramId, TextureId, TextureUnit};
use crate::preprocess::{prepare_fragment, DEFAULT_VERTEX_SHADER, DEFAULT_VERTICES};
use crate::uniform::UniformTable;

static NEXT_NODE_ID: AtomicU32 = AtomicU32::new(0);
static NEXT_NODE_NAME: AtomicU32 = AtomicU32::new(0);

/// Generated sampler name for a child node declared without one.
pub fn next_node_name() -> String {
    format!("u_node{}", NEXT_NODE_NAME.fetch_add(1, Ordering::Relaxed))
}

/// A texture-producing input of a render node (media, audio...).
pub trait TextureInput: fmt::Debug {
    fn name(&self) -> &str;

    fn unit(&self) -> TextureUnit;

    /// Refresh the texture and write this input's uniforms. Called once per
    /// frame with the owning program in use.
    fn update(&mut self, gpu: &dyn Gpu, uniforms: &mut UniformTable);

    fn dispose(&mut self, gpu: &dyn Gpu);
}

/// Shader sources and geometry for one node.
#[derive(Debug, Clone, Default)]
pub struct ShaderOptions {
    /// `None` selects the built-in pass-through vertex shader.
    pub vertex: Option<String>,
    pub fragment: String,
    pub shadertoy: bool,
    /// Flat `x, y` pairs; `None` draws the full-screen quad.
    pub vertices: Option<Vec<f32>>,
}

#[derive(Debug)]
enum NodeOutput {
    Single(Framebuffer),
    Feedback { buffers: PingPong, unit: TextureUnit },
}

impl NodeOutput {
    fn texture(&self) -> TextureId {
        match self {
            NodeOutput::Single(fb) => fb.texture(),
            NodeOutput::Feedback { buffers, .. } => buffers.current().texture(),
        }
    }

    fn dispose(self, gpu: &dyn Gpu) {
        match self {
            NodeOutput::Single(fb) => fb.dispose(gpu),
            NodeOutput::Feedback { buffers, .. } => buffers.dispose(gpu),
        }
    }
}

#[derive(Debug)]
struct ChildNode {
    name: String,
    unit: TextureUnit,
    node: RenderNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Compile or link failed; the node clears its target but never draws.
    Broken,
    Ready,
    Disposed,
}

#[derive(Debug)]
pub struct RenderNode {
    id: u32,
    toy: bool,
    state: NodeState,
    program: Option<ProgramId>,
    vertex_buffer: Option<BufferId>,
    position: Option<u32>,
    vertex_count: i32,
    uniforms: UniformTable,
    children: Vec<ChildNode>,
    textures: Vec<Box<dyn TextureInput>>,
    output: Option<NodeOutput>,
    next_unit: u32,
    liveness: Liveness,
}

impl RenderNode {
    /// Compile the node's program. Failures are logged and leave a node that
    /// still renders its children and clears its target.
    pub fn new(gpu: &dyn Gpu, options: &ShaderOptions) -> Self {
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        let vertices: &[f32] = options.vertices.as_deref().unwrap_or(&DEFAULT_VERTICES);
        let vertex_src = options.vertex.as_deref().unwrap_or(DEFAULT_VERTEX_SHADER);
        let fragment_src = prepare_fragment(&options.fragment, options.shadertoy);

        let mut node = Self {
            id,
            toy: options.shadertoy,
            state: NodeState::Broken,
            program: None,
            vertex_buffer: None,
            position: None,
            vertex_count: (vertices.len() / 2) as i32,
            uniforms: UniformTable::default(),
            children: Vec::new(),
            textures: Vec::new(),
            output: None,
            next_unit: 0,
            liveness: Liveness::new(),
        };

        let program = match compile_program(gpu, vertex_src, &fragment_src) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(node = id, error = %e, source = %fragment_src, "shader program failed");
                return node;
            }
        };

        match gpu.create_vertex_buffer(vertices) {
            Ok(buf) => node.vertex_buffer = Some(buf),
            Err(e) => {
                tracing::error!(node = id, error = %e, "vertex buffer creation failed");
                gpu.delete_program(program);
                return node;
            }
        }

        node.position = gpu.attribute_location(program, "position");
        if node.position.is_none() {
            tracing::warn!(node = id, "vertex shader has no active `position` attribute");
        }
        node.uniforms = UniformTable::introspect(gpu, program);
        node.program = Some(program);
        node.state = NodeState::Ready;
        tracing::debug!(node = id, uniforms = node.uniforms.len(), toy = node.toy, "program ready");
        node
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_shadertoy(&self) -> bool {
        self.toy
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn uniforms(&self) -> &UniformTable {
        &self.uniforms
    }

    /// Cleared when the node is disposed; background loads feeding this node
    /// check it before publishing.
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Reserve the next texture unit of this program.
    pub fn next_texture_unit(&mut self) -> TextureUnit {
        let unit = TextureUnit(self.next_unit);
        self.next_unit += 1;
        if unit.index() >= TextureUnit::COUNT {
            tracing::warn!(node = self.id, unit = unit.index(), "texture unit beyond backend table");
        }
        unit
    }

    /// Texture of the last completed render into this node's own target.
    pub fn output_texture(&self) -> Option<TextureId> {
        self.output.as_ref().map(NodeOutput::texture)
    }

    /// Texture unit reserved for `u_prevbuffer`, if this node keeps feedback.
    pub fn prevbuffer_unit(&self) -> Option<TextureUnit> {
        match &self.output {
            Some(NodeOutput::Feedback { unit, .. }) => Some(*unit),
            _ => None,
        }
    }

    fn to_framebuffer(&mut self, gpu: &dyn Gpu, feedback: bool) {
        let output = if feedback {
            let unit = self.next_texture_unit();
            PingPong::new(gpu, 1, 1).map(|buffers| NodeOutput::Feedback { buffers, unit })
        } else {
            Framebuffer::new(gpu, 1, 1).map(NodeOutput::Single)
        };
        match output {
            Ok(out) => self.output = Some(out),
            Err(e) => tracing::error!(node = self.id, error = %e, "framebuffer creation failed"),
        }
    }

    /// Attach `child` as an input. It renders into its own framebuffer, bound
    /// here under `name` on the next unit of this program.
    pub fn add_node(&mut self, gpu: &dyn Gpu, mut child: RenderNode, name: impl Into<String>, feedback: bool) -> TextureUnit {
        let unit = self.next_texture_unit();
        child.to_framebuffer(gpu, feedback);
        let name = name.into();
        tracing::debug!(parent = self.id, child = child.id, name = %name, unit = unit.index(), "node attached");
        self.children.push(ChildNode { name, unit, node: child });
        unit
    }

    /// Detach a child node by name and hand it back; its framebuffers stay
    /// alive until the caller disposes it.
    pub fn remove_node(&mut self, name: &str) -> Option<RenderNode> {
        let idx = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(idx).node)
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.name.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&RenderNode> {
        self.children.iter().find(|c| c.name == name).map(|c| &c.node)
    }

    pub fn child_unit(&self, name: &str) -> Option<TextureUnit> {
        self.children.iter().find(|c| c.name == name).map(|c| c.unit)
    }

    pub fn add_texture(&mut self, texture: Box<dyn TextureInput>) {
        self.textures.push(texture);
    }

    pub fn remove_texture(&mut self, name: &str) -> Option<Box<dyn TextureInput>> {
        let idx = self.textures.iter().position(|t| t.name() == name)?;
        Some(self.textures.remove(idx))
    }

    pub fn textures(&self) -> impl Iterator<Item = &dyn TextureInput> {
        self.textures.iter().map(|t| t.as_ref())
    }

    /// Render children, then this node into its framebuffer (or the shared
    /// drawable for a root) at `width×height`.
    pub fn render(&mut self, gpu: &dyn Gpu, width: u32, height: u32, uniforms: &[&[UniformState]]) {
        if self.state == NodeState::Disposed {
            return;
        }

        for child in &mut self.children {
            child.node.render(gpu, width, height, uniforms);
        }

        match &mut self.output {
            Some(NodeOutput::Feedback { buffers, .. }) => {
                buffers.swap();
                buffers.ensure_size(gpu, width, height);
                buffers.current().bind(gpu);
            }
            Some(NodeOutput::Single(fb)) => {
                fb.update_resolution(gpu, width, height);
                fb.bind(gpu);
            }
            None => {
                gpu.bind_framebuffer(None);
                gpu.viewport(0, 0, width as i32, height as i32);
            }
        }

        gpu.clear();

        let Some(program) = self.program else {
            return;
        };
        gpu.use_program(Some(program));
        self.update(gpu, uniforms);

        if let (Some(buffer), Some(position)) = (self.vertex_buffer, self.position) {
            gpu.bind_vertex_buffer(buffer, position);
        }
        gpu.draw_triangles(self.vertex_count);
    }

    fn update(&mut self, gpu: &dyn Gpu, uniforms: &[&[UniformState]]) {
        for group in uniforms {
            for state in group.iter() {
                self.uniforms.set_state(gpu, state, self.toy);
            }
        }

        for texture in &mut self.textures {
            texture.update(gpu, &mut self.uniforms);
        }

        if let Some(NodeOutput::Feedback { buffers, unit }) = &self.output {
            if self.uniforms.contains(PREVBUFFER) {
                bind_input(gpu, *unit, buffers.previous().texture());
                self.uniforms.set_sampler(gpu, PREVBUFFER, *unit);
            }
        }

        for child in &self.children {
            if let Some(texture) = child.node.output_texture() {
                bind_input(gpu, child.unit, texture);
                self.uniforms.set_sampler(gpu, &child.name, child.unit);
            }
        }
    }

    /// Free the program, buffers, inputs and every child. Idempotent.
    pub fn dispose(&mut self, gpu: &dyn Gpu) {
        if self.state == NodeState::Disposed {
            return;
        }
        self.state = NodeState::Disposed;
        self.liveness.kill();

        for mut texture in self.textures.drain(..) {
            texture.dispose(gpu);
        }
        for mut child in self.children.drain(..) {
            child.node.dispose(gpu);
        }
        if let Some(output) = self.output.take() {
            output.dispose(gpu);
        }
        if let Some(buffer) = self.vertex_buffer.take() {
            gpu.delete_buffer(buffer);
        }
        if let Some(program) = self.program.take() {
            gpu.delete_program(program);
        }
        tracing::debug!(node = self.id, "node disposed");
    }
}

/// Framebuffer textures are sampled clamped and linear regardless of how the
/// producing node was configured.
fn bind_input(gpu: &dyn Gpu, unit: TextureUnit, texture: TextureId) {
    gpu.active_texture(unit);
    gpu.bind_texture(Some(texture));
    gpu.set_sampler(&SamplerParams::CLAMP_LINEAR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingGpu;
    use doodle_core::UniformValue;

    fn options(fragment: &str) -> ShaderOptions {
        ShaderOptions {
            fragment: fragment.to_string(),
            ..ShaderOptions::default()
        }
    }

    #[test]
    fn broken_program_clears_but_never_draws() {
        let gpu = RecordingGpu::new();
        gpu.fail_compile_on("BROKEN");
        let mut node = RenderNode::new(&gpu, &options("void main(){ BROKEN }"));
        assert_eq!(node.state(), NodeState::Broken);
        node.render(&gpu, 16, 16, &[]);
        assert_eq!(gpu.draw_count(), 0);
        assert_eq!(gpu.clears().len(), 1);
    }

    #[test]
    fn custom_vertices_set_draw_count() {
        let gpu = RecordingGpu::new();
        let mut opts = options("void main(){}");
        opts.vertices = Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        let mut node = RenderNode::new(&gpu, &opts);
        node.render(&gpu, 8, 8, &[]);
        assert_eq!(gpu.draws()[0].vertex_count, 3);
    }

    #[test]
    fn children_render_first_into_their_framebuffers() {
        let gpu = RecordingGpu::new();
        let mut root = RenderNode::new(&gpu, &options("uniform sampler2D u_child;\nvoid main(){}"));
        let child = RenderNode::new(&gpu, &options("void main(){}"));
        let unit = root.add_node(&gpu, child, "u_child", false);
        assert_eq!(unit, TextureUnit(0));

        root.render(&gpu, 32, 32, &[]);
        let draws = gpu.draws();
        assert_eq!(draws.len(), 2);
        assert!(draws[0].framebuffer.is_some());
        assert_eq!(draws[1].framebuffer, None);

        let child_tex = root.child("u_child").and_then(|c| c.output_texture()).unwrap();
        assert!(draws[1].bindings.contains(&(TextureUnit(0), child_tex)));
        assert_eq!(gpu.last_upload("u_child"), Some(UniformValue::Int(0)));
        assert_eq!(gpu.texture(child_tex).unwrap().sampler, Some(SamplerParams::CLAMP_LINEAR));
    }

    #[test]
    fn feedback_child_swaps_every_render() {
        let gpu = RecordingGpu::new();
        let mut root = RenderNode::new(&gpu, &options("uniform sampler2D u_fb;\nvoid main(){}"));
        let child = RenderNode::new(&gpu, &options("uniform sampler2D u_prevbuffer;\nvoid main(){}"));
        root.add_node(&gpu, child, "u_fb", true);
        assert_eq!(root.child("u_fb").and_then(|c| c.prevbuffer_unit()), Some(TextureUnit(0)));

        root.render(&gpu, 8, 8, &[]);
        let first = root.child("u_fb").and_then(|c| c.output_texture()).unwrap();
        root.render(&gpu, 8, 8, &[]);
        let second = root.child("u_fb").and_then(|c| c.output_texture()).unwrap();
        assert_ne!(first, second);

        // The child's second draw samples what it drew the frame before.
        let child_draw = &gpu.draws()[2];
        assert!(child_draw.bindings.contains(&(TextureUnit(0), first)));
    }

    #[test]
    fn dispose_releases_tree() {
        let gpu = RecordingGpu::new();
        let mut root = RenderNode::new(&gpu, &options("void main(){}"));
        let child = RenderNode::new(&gpu, &options("void main(){}"));
        root.add_node(&gpu, child, "u_a", true);
        root.dispose(&gpu);
        root.dispose(&gpu);
        assert_eq!(gpu.live_programs(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
        assert_eq!(gpu.live_textures(), 0);
        assert!(!root.liveness().is_alive());
        root.render(&gpu, 8, 8, &[]);
        assert_eq!(gpu.draw_count(), 0);
    }
}
