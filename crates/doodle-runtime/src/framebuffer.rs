use doodle_core::{DoodleError, SamplerParams};

use crate::gpu::{FramebufferId, Gpu, PixelFormat, TextureId};

/// Off-screen RGBA8 color target.
#[derive(Debug)]
pub struct Framebuffer {
    handle: FramebufferId,
    texture: TextureId,
    width: u32,
    height: u32,
}

impl Framebuffer {
    pub fn new(gpu: &dyn Gpu, width: u32, height: u32) -> Result<Self, DoodleError> {
        let texture = gpu.create_texture()?;
        let (w, h) = (width.max(1), height.max(1));
        gpu.bind_texture(Some(texture));
        gpu.set_sampler(&SamplerParams::CLAMP_LINEAR);
        gpu.tex_image_2d(PixelFormat::Rgba, w, h, None, false);

        let handle = match gpu.create_framebuffer(texture) {
            Ok(fb) => fb,
            Err(e) => {
                gpu.bind_texture(None);
                gpu.delete_texture(texture);
                return Err(e);
            }
        };
        gpu.bind_texture(None);

        Ok(Self {
            handle,
            texture,
            width: w,
            height: h,
        })
    }

    pub fn handle(&self) -> FramebufferId {
        self.handle
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Reallocate the color storage when the size changed. Returns whether it did.
    pub fn update_resolution(&mut self, gpu: &dyn Gpu, width: u32, height: u32) -> bool {
        let (w, h) = (width.max(1), height.max(1));
        if (w, h) == (self.width, self.height) {
            return false;
        }
        self.width = w;
        self.height = h;
        gpu.bind_texture(Some(self.texture));
        gpu.tex_image_2d(PixelFormat::Rgba, w, h, None, false);
        gpu.bind_texture(None);
        true
    }

    /// Make this the draw target and fit the viewport to it.
    pub fn bind(&self, gpu: &dyn Gpu) {
        gpu.bind_framebuffer(Some(self.handle));
        gpu.viewport(0, 0, self.width as i32, self.height as i32);
    }

    pub fn dispose(self, gpu: &dyn Gpu) {
        gpu.delete_framebuffer(self.handle);
        gpu.delete_texture(self.texture);
    }
}

/// Feedback pair: draw into `current` while `previous` holds last frame.
#[derive(Debug)]
pub struct PingPong {
    current: Framebuffer,
    previous: Framebuffer,
}

impl PingPong {
    pub fn new(gpu: &dyn Gpu, width: u32, height: u32) -> Result<Self, DoodleError> {
        let current = Framebuffer::new(gpu, width, height)?;
        let previous = match Framebuffer::new(gpu, width, height) {
            Ok(fb) => fb,
            Err(e) => {
                current.dispose(gpu);
                return Err(e);
            }
        };
        Ok(Self { current, previous })
    }

    pub fn current(&self) -> &Framebuffer {
        &self.current
    }

    pub fn previous(&self) -> &Framebuffer {
        &self.previous
    }

    /// Swap current/previous at the start of a render.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.previous);
    }

    pub fn ensure_size(&mut self, gpu: &dyn Gpu, width: u32, height: u32) {
        self.current.update_resolution(gpu, width, height);
        self.previous.update_resolution(gpu, width, height);
    }

    pub fn dispose(self, gpu: &dyn Gpu) {
        self.current.dispose(gpu);
        self.previous.dispose(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingGpu;

    #[test]
    fn resize_only_on_change() {
        let gpu = RecordingGpu::new();
        let mut fb = Framebuffer::new(&gpu, 64, 32).unwrap();
        let tex = fb.texture();
        let uploads = || gpu.texture(tex).unwrap().full_uploads;
        assert_eq!(uploads(), 1);

        assert!(!fb.update_resolution(&gpu, 64, 32));
        assert_eq!(uploads(), 1);
        assert!(fb.update_resolution(&gpu, 128, 32));
        assert_eq!(uploads(), 2);
        assert_eq!(fb.size(), (128, 32));
    }

    #[test]
    fn bind_sets_viewport() {
        let gpu = RecordingGpu::new();
        let fb = Framebuffer::new(&gpu, 10, 20).unwrap();
        fb.bind(&gpu);
        assert_eq!(gpu.viewports().last(), Some(&[0, 0, 10, 20]));
    }

    #[test]
    fn ping_pong_swaps_identities() {
        let gpu = RecordingGpu::new();
        let mut pp = PingPong::new(&gpu, 4, 4).unwrap();
        let (a, b) = (pp.current().texture(), pp.previous().texture());
        pp.swap();
        assert_eq!(pp.current().texture(), b);
        assert_eq!(pp.previous().texture(), a);
        pp.swap();
        assert_eq!(pp.current().texture(), a);
    }

    #[test]
    fn dispose_frees_everything() {
        let gpu = RecordingGpu::new();
        let pp = PingPong::new(&gpu, 4, 4).unwrap();
        assert_eq!(gpu.live_framebuffers(), 2);
        pp.dispose(&gpu);
        assert_eq!(gpu.live_framebuffers(), 0);
        assert_eq!(gpu.live_textures(), 0);
    }
}
