//! On-screen surfaces: a root node plus the 2D canvas it is composited into.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::RgbaImage;

use doodle_core::uniforms::{surface_uniforms, MOUSE, MOUSEDRAG, RESOLUTION};
use doodle_core::{UniformState, UniformValue};

use crate::gpu::Gpu;
use crate::program::RenderNode;
use crate::renderer::Drawable;

/// Canvas rectangle in CSS pixels, relative to the viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// Window inner size in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// The host's 2D canvas.
pub trait SurfaceCanvas {
    fn bounding_rect(&self) -> Rect;

    /// Replace the canvas content with `pixels` (RGBA8, top row first).
    fn present(&mut self, width: u32, height: u32, pixels: &[u8]);
}

#[derive(Debug)]
struct BufferCanvasInner {
    rect: Rect,
    image: RgbaImage,
    presents: u32,
}

/// In-memory canvas. Clones share state, so a host can keep one to move the
/// rectangle and read back what was composited.
#[derive(Debug, Clone)]
pub struct BufferCanvas(Rc<RefCell<BufferCanvasInner>>);

impl BufferCanvas {
    pub fn new(rect: Rect) -> Self {
        Self(Rc::new(RefCell::new(BufferCanvasInner {
            rect,
            image: RgbaImage::new(0, 0),
            presents: 0,
        })))
    }

    pub fn set_rect(&self, rect: Rect) {
        self.0.borrow_mut().rect = rect;
    }

    pub fn image(&self) -> RgbaImage {
        self.0.borrow().image.clone()
    }

    pub fn present_count(&self) -> u32 {
        self.0.borrow().presents
    }
}

impl SurfaceCanvas for BufferCanvas {
    fn bounding_rect(&self) -> Rect {
        self.0.borrow().rect
    }

    fn present(&mut self, width: u32, height: u32, pixels: &[u8]) {
        let mut inner = self.0.borrow_mut();
        inner.presents += 1;
        match RgbaImage::from_raw(width, height, pixels.to_vec()) {
            Some(img) => inner.image = img,
            None => tracing::warn!(width, height, len = pixels.len(), "present: pixel buffer does not match size"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

static NEXT_SURFACE: AtomicU64 = AtomicU64::new(1);

impl SurfaceId {
    fn next() -> Self {
        Self(NEXT_SURFACE.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct Surface {
    id: SurfaceId,
    canvas: Box<dyn SurfaceCanvas>,
    root: RenderNode,
    fixed_width: u32,
    fixed_height: u32,
    uniforms: Vec<UniformState>,
    rect: Rect,
    visible: bool,
    pixel_ratio: f32,
    ticking: bool,
    pressed: bool,
    mouse: [f32; 2],
    drag: [f32; 4],
    click_callbacks: Vec<Box<dyn FnMut()>>,
    readback: Vec<u8>,
    composite: Vec<u8>,
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("rect", &self.rect)
            .field("visible", &self.visible)
            .field("uniforms", &self.uniforms)
            .field("root", &self.root.id())
            .finish()
    }
}

impl Surface {
    /// `width`/`height` > 0 fix the render size; 0 follows the canvas rectangle.
    pub fn new(canvas: Box<dyn SurfaceCanvas>, root: RenderNode, width: u32, height: u32, viewport: Viewport) -> Self {
        let mut surface = Self {
            id: SurfaceId::next(),
            canvas,
            root,
            fixed_width: width,
            fixed_height: height,
            uniforms: surface_uniforms(),
            rect: Rect::default(),
            visible: false,
            pixel_ratio: 1.0,
            ticking: false,
            pressed: false,
            mouse: [0.0; 2],
            drag: [0.0; 4],
            click_callbacks: Vec::new(),
            readback: Vec::new(),
            composite: Vec::new(),
        };
        surface.update_rect(viewport);
        surface
    }

    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn root(&self) -> &RenderNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RenderNode {
        &mut self.root
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn mouse(&self) -> [f32; 2] {
        self.mouse
    }

    pub fn mouse_drag(&self) -> [f32; 4] {
        self.drag
    }

    pub fn uniforms(&self) -> &[UniformState] {
        &self.uniforms
    }

    pub fn resolution(&self) -> [f32; 2] {
        match self.uniforms[RESOLUTION].value {
            UniformValue::Vec2(v) => v,
            _ => [0.0; 2],
        }
    }

    /// Size in CSS pixels: the fixed size where set, else the rectangle.
    fn css_size(&self) -> (f32, f32) {
        let w = if self.fixed_width > 0 { self.fixed_width as f32 } else { self.rect.width };
        let h = if self.fixed_height > 0 { self.fixed_height as f32 } else { self.rect.height };
        (w, h)
    }

    fn update_rect(&mut self, viewport: Viewport) {
        let rect = self.canvas.bounding_rect();
        self.visible = rect.bottom() >= 0.0
            && rect.right() >= 0.0
            && rect.top <= viewport.height
            && rect.left <= viewport.width;
        self.rect = rect;

        let (w, h) = self.css_size();
        let res = [(w * self.pixel_ratio).floor(), (h * self.pixel_ratio).floor()];
        self.uniforms[RESOLUTION].value.assign(&UniformValue::Vec2(res));
    }

    fn tick(&mut self, viewport: Viewport) {
        self.update_rect(viewport);
        self.ticking = false;
    }

    /// Surface-local position in drawing-buffer pixels, origin bottom-left.
    fn local(&self, client_x: f32, client_y: f32) -> [f32; 2] {
        let x = client_x - self.rect.left.floor();
        let y = self.rect.height.floor() - (client_y - self.rect.top.floor());
        [x * self.pixel_ratio, y * self.pixel_ratio]
    }

    fn write_pointer(&mut self) {
        self.uniforms[MOUSE].value.assign(&UniformValue::Vec2(self.mouse));
        self.uniforms[MOUSEDRAG].value.assign(&UniformValue::Vec4(self.drag));
    }

    /// Register a gesture listener, run on every press.
    pub fn add_click(&mut self, cb: impl FnMut() + 'static) {
        self.click_callbacks.push(Box::new(cb));
    }

    pub fn press(&mut self, client_x: f32, client_y: f32) {
        for cb in &mut self.click_callbacks {
            cb();
        }
        self.pressed = true;
        let [x, y] = self.local(client_x, client_y);
        self.drag = [x, y, x, y];
        self.write_pointer();
    }

    /// Only the first move of a frame is applied.
    pub fn move_to(&mut self, client_x: f32, client_y: f32) {
        if self.ticking {
            return;
        }
        self.mouse = self.local(client_x, client_y);
        if self.pressed {
            self.drag[0] = self.mouse[0];
            self.drag[1] = self.mouse[1];
        }
        self.write_pointer();
        self.ticking = true;
    }

    /// Release (or pointer leaving): the anchor in `zw` turns negative.
    pub fn release(&mut self) {
        self.pressed = false;
        for anchor in &mut self.drag[2..] {
            if *anchor > 0.0 {
                *anchor = -*anchor;
            }
        }
        self.write_pointer();
    }

    /// Render this surface's tree into the shared drawable and copy the
    /// result into the canvas. Returns whether anything was drawn.
    pub fn render(
        &mut self,
        gpu: &dyn Gpu,
        viewport: Viewport,
        drawable: &mut Drawable,
        globals: &[&[UniformState]],
    ) -> bool {
        self.pixel_ratio = drawable.pixel_ratio();
        self.tick(viewport);
        if !self.visible {
            return false;
        }

        let (w, h) = self.css_size();
        drawable.grow(gpu, w, h);
        let [pw, ph] = self.resolution();
        let (pw, ph) = (pw as u32, ph as u32);
        if pw == 0 || ph == 0 {
            return false;
        }

        let mut groups: Vec<&[UniformState]> = Vec::with_capacity(globals.len() + 1);
        groups.extend_from_slice(globals);
        groups.push(&self.uniforms);
        self.root.render(gpu, pw, ph, &groups);

        self.copy_out(gpu, pw, ph);
        true
    }

    /// Read the bottom-left `w×h` of the drawable and present it top-down.
    fn copy_out(&mut self, gpu: &dyn Gpu, w: u32, h: u32) {
        let row = w as usize * 4;
        let len = row * h as usize;
        self.readback.resize(len, 0);
        self.composite.resize(len, 0);

        gpu.bind_framebuffer(None);
        gpu.read_pixels(0, 0, w, h, &mut self.readback);
        for (dst, src) in self
            .composite
            .chunks_exact_mut(row)
            .zip(self.readback.chunks_exact(row).rev())
        {
            dst.copy_from_slice(src);
        }
        self.canvas.present(w, h, &self.composite);
    }

    pub fn dispose(&mut self, gpu: &dyn Gpu) {
        self.click_callbacks.clear();
        self.root.dispose(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ShaderOptions;
    use crate::testing::RecordingGpu;

    fn surface(gpu: &RecordingGpu, canvas: &BufferCanvas, width: u32, height: u32) -> Surface {
        let root = RenderNode::new(
            gpu,
            &ShaderOptions {
                fragment: "void main(){ gl_FragColor = vec4(1.0); }".into(),
                ..ShaderOptions::default()
            },
        );
        Surface::new(Box::new(canvas.clone()), root, width, height, Viewport::new(640.0, 480.0))
    }

    #[test]
    fn drag_anchor_flips_sign_on_release() {
        let gpu = RecordingGpu::new();
        let canvas = BufferCanvas::new(Rect::new(0.0, 0.0, 200.0, 150.0));
        let mut s = surface(&gpu, &canvas, 0, 0);

        s.press(10.0, 20.0);
        assert_eq!(s.mouse_drag(), [10.0, 130.0, 10.0, 130.0]);
        s.move_to(30.0, 50.0);
        s.release();
        assert_eq!(s.mouse(), [30.0, 100.0]);
        assert_eq!(s.mouse_drag(), [30.0, 100.0, -10.0, -130.0]);
        assert_eq!(s.uniforms()[MOUSEDRAG].value, UniformValue::Vec4([30.0, 100.0, -10.0, -130.0]));

        // A second release keeps the magnitude.
        s.release();
        assert_eq!(s.mouse_drag()[2..], [-10.0, -130.0]);
    }

    #[test]
    fn only_the_first_move_of_a_frame_counts() {
        let gpu = RecordingGpu::new();
        let canvas = BufferCanvas::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        let mut s = surface(&gpu, &canvas, 0, 0);
        let mut drawable = Drawable::new(1.0);

        s.move_to(10.0, 10.0);
        s.move_to(50.0, 50.0);
        assert_eq!(s.mouse(), [10.0, 90.0]);

        s.render(&gpu, Viewport::new(640.0, 480.0), &mut drawable, &[]);
        s.move_to(50.0, 50.0);
        assert_eq!(s.mouse(), [50.0, 50.0]);
    }

    #[test]
    fn offscreen_surface_draws_nothing() {
        let gpu = RecordingGpu::new();
        let canvas = BufferCanvas::new(Rect::new(0.0, -300.0, 100.0, 100.0));
        let mut s = surface(&gpu, &canvas, 0, 0);
        let mut drawable = Drawable::new(1.0);

        assert!(!s.render(&gpu, Viewport::new(640.0, 480.0), &mut drawable, &[]));
        assert!(!s.is_visible());
        assert_eq!(gpu.draw_count(), 0);
        assert_eq!(canvas.present_count(), 0);

        canvas.set_rect(Rect::new(0.0, 10.0, 100.0, 100.0));
        assert!(s.render(&gpu, Viewport::new(640.0, 480.0), &mut drawable, &[]));
        assert_eq!(gpu.draw_count(), 1);
        assert_eq!(canvas.present_count(), 1);
        assert_eq!(canvas.image().dimensions(), (100, 100));
    }

    #[test]
    fn fixed_size_overrides_rect() {
        let gpu = RecordingGpu::new();
        let canvas = BufferCanvas::new(Rect::new(0.0, 0.0, 300.0, 300.0));
        let mut s = surface(&gpu, &canvas, 64, 32);
        let mut drawable = Drawable::new(1.0);

        s.render(&gpu, Viewport::new(640.0, 480.0), &mut drawable, &[]);
        assert_eq!(s.resolution(), [64.0, 32.0]);
        assert_eq!(gpu.drawable_size(), (64, 32));
        assert_eq!(gpu.last_upload("u_resolution"), Some(UniformValue::Vec2([64.0, 32.0])));
        assert_eq!(gpu.viewports().last(), Some(&[0, 0, 64, 32]));
    }

    #[test]
    fn visibility_edges_are_inclusive() {
        let gpu = RecordingGpu::new();
        let canvas = BufferCanvas::new(Rect::new(640.0, 480.0, 10.0, 10.0));
        let s = surface(&gpu, &canvas, 0, 0);
        assert!(s.is_visible());

        canvas.set_rect(Rect::new(-10.0, -10.0, 10.0, 10.0));
        let s = surface(&gpu, &canvas, 0, 0);
        assert!(s.is_visible());
    }
}
