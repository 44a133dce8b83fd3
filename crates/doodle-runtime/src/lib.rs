#![forbid(unsafe_code)]

//! Backend-agnostic shader graph runtime.
//!
//! Everything GPU-facing goes through the [`Gpu`] trait; `doodle-runtime-glow`
//! implements it over a GL context and [`testing::RecordingGpu`] records calls
//! for tests. A frame flows from the [`Renderer`] clock through each
//! [`Surface`] into its tree of [`RenderNode`]s, children first.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod audio;
pub mod audio_gate;
pub mod framebuffer;
pub mod gpu;
pub mod media;
pub mod orientation;
pub mod preprocess;
pub mod program;
pub mod renderer;
pub mod scene;
pub mod source;
pub mod surface;
pub mod texture;
pub mod uniform;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use audio::AudioTexture;
pub use audio_gate::{AudioGate, TapKind};
pub use framebuffer::{Framebuffer, PingPong};
pub use gpu::{
    compile_program, ActiveUniform, BufferId, FramebufferId, Gpu, PixelFormat, ProgramId, Region,
    ShaderId, ShaderStage, TextureId, TextureUnit, UniformKind, UniformLocation,
};
pub use media::MediaTexture;
pub use orientation::{OrientationFeed, OrientationSensor};
pub use program::{NodeState, RenderNode, ShaderOptions, TextureInput};
pub use renderer::{
    install, reset_singleton, singleton_or_init, with_singleton, Drawable, FrameScheduler,
    ManualScheduler, PointerKind, Renderer,
};
pub use scene::{build_node, build_plan, build_scene, build_surface};
pub use source::{RawFrame, SharedCanvas, SourceRegistry, TextureSource};
pub use surface::{BufferCanvas, Rect, Surface, SurfaceCanvas, SurfaceId, Viewport};
pub use texture::{TextureBinding, TextureOptions, TextureUpdate};
pub use uniform::{Uniform, UniformTable};
