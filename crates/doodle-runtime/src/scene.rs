//! Builds render trees from declarative config.
//!
//! The config is lowered into a [`SceneGraph`], compiled into a bottom-up
//! [`Plan`] and then instantiated pass by pass: children exist before the pass
//! that samples them, and every pass hands out texture units to its inputs in
//! declaration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use doodle_core::{DoodleConfig, DoodleError, NodeConfig, PassConfig, ShaderSourceConfig, SurfaceConfig, UniformValue};
use doodle_graph::{Decl, DeclId, Plan, SceneGraph};
use doodle_loader::fetch_text;

use crate::audio::{next_audio_name, AudioTexture};
use crate::media::MediaTexture;
use crate::program::{next_node_name, RenderNode, ShaderOptions};
use crate::renderer::Renderer;
use crate::surface::{Surface, SurfaceCanvas, SurfaceId};

static NEXT_TEXTURE_NAME: AtomicU32 = AtomicU32::new(0);

fn next_texture_name() -> String {
    format!("u_texture{}", NEXT_TEXTURE_NAME.fetch_add(1, Ordering::Relaxed))
}

fn resolve_source(src: &ShaderSourceConfig) -> Result<String, DoodleError> {
    match src {
        ShaderSourceConfig::Inline(text) => Ok(text.clone()),
        ShaderSourceConfig::Url(url) => {
            tracing::debug!(url = %url, "fetching shader source");
            fetch_text(url).map_err(|e| DoodleError::Fetch {
                src: url.clone(),
                msg: e.to_string(),
            })
        }
    }
}

pub fn shader_options(pass: &PassConfig) -> Result<ShaderOptions, DoodleError> {
    Ok(ShaderOptions {
        vertex: pass.vertex.as_ref().map(resolve_source).transpose()?,
        fragment: resolve_source(&pass.fragment)?,
        shadertoy: pass.shadertoy,
        vertices: pass.vertices.clone(),
    })
}

/// Instantiate a compiled plan. Shader sources are resolved before any GPU
/// object is created, so a failed fetch leaves nothing behind.
pub fn build_plan(renderer: &mut Renderer, graph: &SceneGraph, plan: &Plan) -> Result<RenderNode, DoodleError> {
    let mut options: HashMap<DeclId, ShaderOptions> = HashMap::new();
    for id in &plan.order {
        if let Some(Decl::Pass(pass)) = graph.decl(*id) {
            options.insert(*id, shader_options(pass)?);
        }
    }

    let mut built: HashMap<DeclId, RenderNode> = HashMap::new();
    let mut user_uniforms: Vec<(String, UniformValue)> = Vec::new();
    {
        let gpu = renderer.gpu();
        let sources = renderer.sources();
        let gate = renderer.gate();

        for id in &plan.order {
            let (Some(Decl::Pass(pass)), Some(opts)) = (graph.decl(*id), options.get(id)) else {
                continue;
            };
            let mut node = RenderNode::new(gpu, opts);
            if *id == plan.root && pass.prevbuffer {
                tracing::warn!(node = node.id(), "prevbuffer on a root pass is ignored; it renders to the screen");
            }

            for child_id in graph.children(*id) {
                match graph.decl(*child_id) {
                    Some(Decl::Pass(child_pass)) => {
                        let Some(child) = built.remove(child_id) else {
                            continue;
                        };
                        let name = child_pass.name.clone().unwrap_or_else(next_node_name);
                        node.add_node(gpu, child, name, child_pass.prevbuffer);
                    }
                    Some(Decl::Texture(cfg)) => {
                        let name = cfg.name.clone().unwrap_or_else(|| {
                            let generated = next_texture_name();
                            tracing::warn!(texture = %generated, "texture declared without a name");
                            generated
                        });
                        let unit = node.next_texture_unit();
                        match MediaTexture::new(gpu, unit, name, cfg, sources) {
                            Ok(tex) => node.add_texture(Box::new(tex)),
                            Err(e) => tracing::warn!(error = %e, "texture input dropped"),
                        }
                    }
                    Some(Decl::Audio(cfg)) => {
                        let has_src = cfg.src.as_deref().is_some_and(|s| !s.trim().is_empty());
                        if !has_src && !cfg.mic {
                            tracing::debug!(name = ?cfg.name, "audio input without src skipped");
                            continue;
                        }
                        let name = cfg.name.clone().unwrap_or_else(next_audio_name);
                        let unit = node.next_texture_unit();
                        match AudioTexture::new(gpu, unit, name, cfg, sources, gate) {
                            Ok(tex) => node.add_texture(Box::new(tex)),
                            Err(e) => tracing::warn!(error = %e, "audio input dropped"),
                        }
                    }
                    Some(Decl::Uniform(cfg)) => user_uniforms.push((cfg.name.clone(), cfg.value())),
                    None => {}
                }
            }
            built.insert(*id, node);
        }
    }

    for (name, value) in user_uniforms {
        renderer.add_uniform(name, value);
    }
    built
        .remove(&plan.root)
        .ok_or_else(|| DoodleError::graph("root pass was not built"))
}

pub fn build_node(renderer: &mut Renderer, cfg: &NodeConfig) -> Result<RenderNode, DoodleError> {
    let (graph, root) = SceneGraph::from_config(cfg)?;
    let plan = graph.compile(root)?;
    tracing::debug!(decls = plan.order.len(), unnamed = plan.unnamed_passes, "scene plan compiled");
    build_plan(renderer, &graph, &plan)
}

/// Build one surface and register it with `renderer`.
pub fn build_surface(
    renderer: &mut Renderer,
    canvas: Box<dyn SurfaceCanvas>,
    cfg: &SurfaceConfig,
) -> Result<SurfaceId, DoodleError> {
    let root = build_node(renderer, &cfg.root)?;
    let surface = Surface::new(canvas, root, cfg.width, cfg.height, renderer.viewport());
    Ok(renderer.add_surface(surface))
}

/// Build every surface of `cfg`, one canvas per surface in order.
pub fn build_scene(
    renderer: &mut Renderer,
    cfg: &DoodleConfig,
    canvases: Vec<Box<dyn SurfaceCanvas>>,
) -> Result<Vec<SurfaceId>, DoodleError> {
    if canvases.len() != cfg.surfaces.len() {
        return Err(DoodleError::InvalidConfig(format!(
            "{} surfaces declared but {} canvases given",
            cfg.surfaces.len(),
            canvases.len()
        )));
    }
    cfg.surfaces
        .iter()
        .zip(canvases)
        .map(|(surface, canvas)| build_surface(renderer, canvas, surface))
        .collect()
}
