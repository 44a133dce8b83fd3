//! The process-wide renderer: GPU context owner, frame clock and surface fan-out.

use std::cell::RefCell;
use std::fmt;

use chrono::{Datelike, Local, Timelike};

use doodle_core::uniforms::{global_uniforms, DATE, DELTA, FRAME, TIME};
use doodle_core::{UniformState, UniformValue};

use crate::audio_gate::{AudioGate, TapKind};
use crate::gpu::Gpu;
use crate::orientation::OrientationFeed;
use crate::source::SourceRegistry;
use crate::surface::{Surface, SurfaceId, Viewport};

const FLOAT_EXTENSIONS: [&str; 4] = [
    "OES_texture_float",
    "OES_texture_float_linear",
    "OES_texture_half_float",
    "OES_texture_half_float_linear",
];

/// Host hook for the animation frame request.
pub trait FrameScheduler {
    fn request(&mut self);
    fn cancel(&mut self);
}

/// Scheduler for hosts that drive [`Renderer::frame`] themselves.
#[derive(Debug, Default)]
pub struct ManualScheduler;

impl FrameScheduler for ManualScheduler {
    fn request(&mut self) {}
    fn cancel(&mut self) {}
}

/// The shared drawing buffer every surface renders into. It only grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawable {
    width: f32,
    height: f32,
    pixel_ratio: f32,
}

impl Drawable {
    pub fn new(pixel_ratio: f32) -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            pixel_ratio,
        }
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Size in CSS pixels.
    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.width * self.pixel_ratio).floor() as u32,
            (self.height * self.pixel_ratio).floor() as u32,
        )
    }

    /// Grow to hold `width × height`; never shrinks.
    pub fn grow(&mut self, gpu: &dyn Gpu, width: f32, height: f32) {
        if width <= self.width && height <= self.height {
            return;
        }
        self.width = self.width.max(width);
        self.height = self.height.max(height);
        let (pw, ph) = self.pixel_size();
        tracing::debug!(width = pw, height = ph, "shared canvas resized");
        gpu.resize_drawable(pw, ph);
    }

    fn set_pixel_ratio(&mut self, gpu: &dyn Gpu, ratio: f32) {
        self.pixel_ratio = ratio;
        let (pw, ph) = self.pixel_size();
        gpu.resize_drawable(pw, ph);
    }
}

/// Pointer device of an event routed to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch,
}

pub struct Renderer {
    gpu: Box<dyn Gpu>,
    drawable: Drawable,
    viewport: Viewport,
    globals: Vec<UniformState>,
    orientation: OrientationFeed,
    gate: AudioGate,
    sources: SourceRegistry,
    surfaces: Vec<Surface>,
    scheduler: Box<dyn FrameScheduler>,
    frame_requested: bool,
    last_ts: Option<f64>,
    time: f64,
    frame: i32,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("drawable", &self.drawable)
            .field("viewport", &self.viewport)
            .field("surfaces", &self.surfaces.len())
            .field("frame", &self.frame)
            .field("time", &self.time)
            .finish()
    }
}

impl Renderer {
    pub fn new(gpu: Box<dyn Gpu>) -> Self {
        gpu.enable_alpha_blending();
        gpu.clear_color([0.0, 0.0, 0.0, 0.0]);
        for ext in FLOAT_EXTENSIONS {
            if !gpu.has_extension(ext) {
                tracing::warn!(extension = ext, "float texture extension unavailable");
            }
        }

        Self {
            gpu,
            drawable: Drawable::new(1.0),
            viewport: Viewport::default(),
            globals: global_uniforms(),
            orientation: OrientationFeed::default(),
            gate: AudioGate::new(),
            sources: SourceRegistry::new(),
            surfaces: Vec::new(),
            scheduler: Box::new(ManualScheduler),
            frame_requested: false,
            last_ts: None,
            time: 0.0,
            frame: 0,
        }
    }

    pub fn gpu(&self) -> &dyn Gpu {
        self.gpu.as_ref()
    }

    /// Tear down and hand back the context.
    pub fn into_gpu(mut self) -> Box<dyn Gpu> {
        self.dispose();
        self.gpu
    }

    pub fn set_scheduler(&mut self, scheduler: Box<dyn FrameScheduler>) {
        self.scheduler = scheduler;
        if self.frame_requested {
            self.scheduler.request();
        }
    }

    pub fn is_frame_requested(&self) -> bool {
        self.frame_requested
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn drawable(&self) -> &Drawable {
        &self.drawable
    }

    pub fn set_pixel_ratio(&mut self, ratio: f32) {
        if ratio <= 0.0 || !ratio.is_finite() {
            tracing::warn!(ratio, "ignoring invalid pixel ratio");
            return;
        }
        self.drawable.set_pixel_ratio(self.gpu.as_ref(), ratio);
    }

    pub fn gate(&self) -> &AudioGate {
        &self.gate
    }

    pub fn orientation_mut(&mut self) -> &mut OrientationFeed {
        &mut self.orientation
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceRegistry {
        &mut self.sources
    }

    /// Built-in clock uniforms followed by user uniforms.
    pub fn globals(&self) -> &[UniformState] {
        &self.globals
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.globals.iter().find(|u| u.name == name).map(|u| &u.value)
    }

    /// Declare (or redeclare) a global user uniform. A redeclaration keeps the
    /// declared type; a value of another type is refused.
    pub fn add_uniform(&mut self, name: impl Into<String>, value: UniformValue) {
        let name = name.into();
        match self.globals.iter_mut().find(|u| u.name == name) {
            Some(existing) => {
                if !existing.value.assign(&value) {
                    tracing::warn!(uniform = %name, expected = %existing.ty(), got = %value.ty(), "uniform redeclared with another type");
                }
            }
            None => {
                tracing::debug!(uniform = %name, ty = %value.ty(), "global uniform added");
                self.globals.push(UniformState::aliased(name.clone(), name, value));
            }
        }
    }

    /// Update a declared uniform in place. Unknown names and type changes are refused.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(state) = self.globals.iter_mut().find(|u| u.name == name) else {
            tracing::warn!(uniform = name, "set_uniform on undeclared uniform");
            return false;
        };
        if !state.value.assign(&value) {
            tracing::warn!(uniform = name, expected = %state.ty(), got = %value.ty(), "uniform type mismatch");
            return false;
        }
        true
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn frame_count(&self) -> i32 {
        self.frame
    }

    fn request_frame(&mut self) {
        if !self.frame_requested {
            self.frame_requested = true;
            self.scheduler.request();
        }
    }

    fn cancel_frame(&mut self) {
        if self.frame_requested {
            self.frame_requested = false;
            self.scheduler.cancel();
        }
    }

    pub fn add_surface(&mut self, surface: Surface) -> SurfaceId {
        let id = surface.id();
        tracing::debug!(surface = id.0, "surface added");
        self.surfaces.push(surface);
        self.request_frame();
        id
    }

    /// Detach a surface and release its GPU resources.
    pub fn remove_surface(&mut self, id: SurfaceId) -> bool {
        let Some(pos) = self.surfaces.iter().position(|s| s.id() == id) else {
            return false;
        };
        let mut surface = self.surfaces.remove(pos);
        surface.dispose(self.gpu.as_ref());
        if self.surfaces.is_empty() {
            self.cancel_frame();
        }
        true
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id() == id)
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.iter_mut().find(|s| s.id() == id)
    }

    pub fn surface_ids(&self) -> Vec<SurfaceId> {
        self.surfaces.iter().map(Surface::id).collect()
    }

    // ---- pointer routing ----

    pub fn pointer_down(&mut self, id: SurfaceId, client_x: f32, client_y: f32, kind: PointerKind) {
        let Some(surface) = self.surfaces.iter_mut().find(|s| s.id() == id) else {
            return;
        };
        surface.press(client_x, client_y);
        self.orientation.request();
        if kind == PointerKind::Touch {
            self.gate.tap(id.0, TapKind::TouchStart);
        }
    }

    pub fn pointer_move(&mut self, id: SurfaceId, client_x: f32, client_y: f32, kind: PointerKind) {
        let Some(surface) = self.surfaces.iter_mut().find(|s| s.id() == id) else {
            return;
        };
        surface.move_to(client_x, client_y);
        if kind == PointerKind::Touch {
            self.gate.touch_move(id.0);
        }
    }

    pub fn pointer_up(&mut self, id: SurfaceId, kind: PointerKind) {
        let Some(surface) = self.surfaces.iter_mut().find(|s| s.id() == id) else {
            return;
        };
        surface.release();
        let tap = match kind {
            PointerKind::Mouse => TapKind::MouseUp,
            PointerKind::Touch => TapKind::TouchEnd,
        };
        self.gate.tap(id.0, tap);
    }

    /// Pointer left the surface: ends a drag without counting as a tap.
    pub fn pointer_leave(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.iter_mut().find(|s| s.id() == id) {
            surface.release();
        }
    }

    // ---- frame loop ----

    fn advance_clock(&mut self, ts_ms: f64) {
        let delta = match self.last_ts {
            Some(last) => (ts_ms - last) / 1000.0,
            None => 0.0,
        };
        self.last_ts = Some(ts_ms);
        self.time += delta;
        self.frame += 1;

        let now = Local::now();
        let seconds = now.hour() as f32 * 3600.0
            + now.minute() as f32 * 60.0
            + now.second() as f32
            + now.timestamp_subsec_millis() as f32 * 0.001;

        self.globals[TIME].value = UniformValue::Float(self.time as f32);
        self.globals[DELTA].value = UniformValue::Float(delta as f32);
        self.globals[FRAME].value = UniformValue::Int(self.frame);
        self.globals[DATE].value =
            UniformValue::Vec4([now.year() as f32, now.month() as f32, now.day() as f32, seconds]);
    }

    /// Run one animation frame at host timestamp `ts_ms`. Returns how many
    /// surfaces drew.
    pub fn frame(&mut self, ts_ms: f64) -> usize {
        self.frame_requested = false;
        if self.surfaces.is_empty() {
            return 0;
        }

        self.advance_clock(ts_ms);
        self.orientation.tick();

        let gpu = self.gpu.as_ref();
        let groups: [&[UniformState]; 2] = [&self.globals, self.orientation.uniforms()];
        let mut drawn = 0;
        for surface in &mut self.surfaces {
            if surface.render(gpu, self.viewport, &mut self.drawable, &groups) {
                drawn += 1;
            }
        }

        tracing::trace!(frame = self.frame, drawn, "frame rendered");
        self.request_frame();
        drawn
    }

    pub fn dispose(&mut self) {
        let gpu = self.gpu.as_ref();
        for surface in &mut self.surfaces {
            surface.dispose(gpu);
        }
        self.surfaces.clear();
        self.cancel_frame();
        self.orientation.dispose();
        let dropped = self.gate.pending_callbacks();
        self.gate.dispose();
        tracing::debug!(dropped_callbacks = dropped, "renderer disposed");
    }
}

// ---- singleton ----

thread_local! {
    static RENDERER: RefCell<Option<Renderer>> = const { RefCell::new(None) };
}

/// Run `f` on the thread's renderer, creating it from `make_gpu` on first use.
pub fn singleton_or_init<R>(make_gpu: impl FnOnce() -> Box<dyn Gpu>, f: impl FnOnce(&mut Renderer) -> R) -> R {
    RENDERER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let renderer = slot.get_or_insert_with(|| Renderer::new(make_gpu()));
        f(renderer)
    })
}

/// Run `f` on the thread's renderer if one exists.
pub fn with_singleton<R>(f: impl FnOnce(&mut Renderer) -> R) -> Option<R> {
    RENDERER.with(|cell| cell.borrow_mut().as_mut().map(f))
}

/// Install `renderer` as the thread's singleton, returning the previous one.
pub fn install(renderer: Renderer) -> Option<Renderer> {
    RENDERER.with(|cell| cell.borrow_mut().replace(renderer))
}

/// Dispose the current renderer and replace it with a fresh one on the same
/// context. Returns false when no renderer existed.
pub fn reset_singleton() -> bool {
    RENDERER.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.take() {
            Some(old) => {
                *slot = Some(Renderer::new(old.into_gpu()));
                true
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{RenderNode, ShaderOptions};
    use crate::surface::{BufferCanvas, Rect};
    use crate::testing::RecordingGpu;
    use std::rc::Rc;

    #[derive(Default)]
    struct CountingScheduler {
        requests: Rc<RefCell<(u32, u32)>>,
    }

    impl FrameScheduler for CountingScheduler {
        fn request(&mut self) {
            self.requests.borrow_mut().0 += 1;
        }
        fn cancel(&mut self) {
            self.requests.borrow_mut().1 += 1;
        }
    }

    const FRAG: &str = "void main(){ gl_FragColor = vec4(u_time); }";

    fn surface(gpu: &RecordingGpu, rect: Rect) -> Surface {
        let root = RenderNode::new(
            gpu,
            &ShaderOptions {
                fragment: FRAG.into(),
                ..ShaderOptions::default()
            },
        );
        Surface::new(Box::new(BufferCanvas::new(rect)), root, 0, 0, Viewport::new(800.0, 600.0))
    }

    fn renderer(gpu: &RecordingGpu) -> Renderer {
        let mut r = Renderer::new(Box::new(gpu.clone()));
        r.set_viewport(Viewport::new(800.0, 600.0));
        r
    }

    #[test]
    fn construction_sets_blend_and_clear_state() {
        let gpu = RecordingGpu::new();
        gpu.remove_extension("OES_texture_float");
        let _r = renderer(&gpu);
        assert!(gpu.blending_enabled());
        assert_eq!(gpu.clear_color_value(), [0.0; 4]);
    }

    #[test]
    fn clock_counts_frames_and_seconds() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 64.0, 32.0)));

        r.frame(1000.0);
        assert_eq!(r.uniform("u_delta"), Some(&UniformValue::Float(0.0)));
        r.frame(1500.0);
        r.frame(2000.0);
        assert_eq!(r.frame_count(), 3);
        assert_eq!(r.uniform("u_frame"), Some(&UniformValue::Int(3)));
        assert!((r.time() - 1.0).abs() < 1e-9);
        assert_eq!(r.uniform("u_delta"), Some(&UniformValue::Float(0.5)));
        match r.uniform("u_date") {
            Some(UniformValue::Vec4(d)) => assert!(d[1] >= 1.0 && d[1] <= 12.0),
            other => panic!("unexpected date {other:?}"),
        }
    }

    #[test]
    fn frame_loop_stops_without_surfaces() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        let counts = Rc::new(RefCell::new((0, 0)));
        r.set_scheduler(Box::new(CountingScheduler {
            requests: Rc::clone(&counts),
        }));

        let id = r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 16.0, 16.0)));
        assert!(r.is_frame_requested());
        r.frame(0.0);
        assert!(r.is_frame_requested());

        assert!(r.remove_surface(id));
        assert!(!r.is_frame_requested());
        assert_eq!(counts.borrow().1, 1);

        assert_eq!(r.frame(16.0), 0);
        assert!(!r.is_frame_requested());
        assert_eq!(r.frame_count(), 1);
    }

    #[test]
    fn shared_canvas_only_grows() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 100.0, 40.0)));
        r.add_surface(surface(&gpu, Rect::new(0.0, 50.0, 60.0, 80.0)));
        r.frame(0.0);
        assert_eq!(gpu.drawable_size(), (100, 80));
    }

    #[test]
    fn pixel_ratio_scales_the_drawable() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        r.set_pixel_ratio(2.0);
        let id = r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 50.0, 25.0)));
        r.frame(0.0);
        assert_eq!(gpu.drawable_size(), (100, 50));
        assert_eq!(r.surface(id).unwrap().resolution(), [100.0, 50.0]);
    }

    #[test]
    fn user_uniforms_keep_their_type() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        r.add_uniform("u_speed", UniformValue::Float(1.0));
        assert!(r.set_uniform("u_speed", UniformValue::Float(2.0)));
        assert!(!r.set_uniform("u_speed", UniformValue::Vec2([1.0, 1.0])));
        assert!(!r.set_uniform("u_missing", UniformValue::Float(1.0)));
        assert_eq!(r.uniform("u_speed"), Some(&UniformValue::Float(2.0)));
    }

    #[test]
    fn redeclaring_a_uniform_keeps_its_type() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        r.add_uniform("u_speed", UniformValue::Float(1.0));
        r.add_uniform("u_speed", UniformValue::Float(3.0));
        assert_eq!(r.uniform("u_speed"), Some(&UniformValue::Float(3.0)));

        r.add_uniform("u_speed", UniformValue::Vec2([1.0, 1.0]));
        assert_eq!(r.uniform("u_speed"), Some(&UniformValue::Float(3.0)));
        r.add_uniform("u_time", UniformValue::Vec4([0.0; 4]));
        assert_eq!(r.uniform("u_time"), Some(&UniformValue::Float(0.0)));
        assert_eq!(r.globals().iter().filter(|u| u.name == "u_speed").count(), 1);
    }

    #[test]
    fn touch_end_after_drag_is_not_a_tap() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        let id = r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 32.0, 32.0)));

        r.pointer_move(id, 8.0, 8.0, PointerKind::Touch);
        r.pointer_up(id, PointerKind::Touch);
        assert!(!r.gate().is_unlocked());
        r.pointer_leave(id);
        assert!(!r.gate().is_unlocked());

        r.pointer_down(id, 4.0, 4.0, PointerKind::Mouse);
        r.pointer_up(id, PointerKind::Mouse);
        assert!(r.gate().is_unlocked());
    }

    #[test]
    fn touch_start_unlocks_audio() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        let id = r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 32.0, 32.0)));
        r.pointer_down(id, 4.0, 4.0, PointerKind::Touch);
        assert!(r.gate().is_unlocked());
    }

    #[test]
    fn dispose_releases_every_surface() {
        let gpu = RecordingGpu::new();
        let mut r = renderer(&gpu);
        r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 8.0, 8.0)));
        r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 8.0, 8.0)));
        r.frame(0.0);
        r.dispose();
        assert!(r.surface_ids().is_empty());
        assert_eq!(gpu.live_programs(), 0);
        assert!(!r.is_frame_requested());
    }

    #[test]
    fn singleton_is_lazy_and_resettable() {
        let gpu = RecordingGpu::new();
        let frames = singleton_or_init(
            || Box::new(gpu.clone()) as Box<dyn Gpu>,
            |r| {
                r.set_viewport(Viewport::new(100.0, 100.0));
                r.add_surface(surface(&gpu, Rect::new(0.0, 0.0, 10.0, 10.0)));
                r.frame(0.0);
                r.frame_count()
            },
        );
        assert_eq!(frames, 1);
        assert_eq!(with_singleton(|r| r.surface_ids().len()), Some(1));

        assert!(reset_singleton());
        assert_eq!(with_singleton(|r| (r.surface_ids().len(), r.frame_count())), Some((0, 0)));
        assert!(install(Renderer::new(Box::new(gpu.clone()))).is_some());
    }
}
