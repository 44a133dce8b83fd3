//! A GPU texture on a fixed unit, with the upload rules every texture input shares.

use std::sync::atomic::{AtomicU64, Ordering};

use image::imageops;
use image::RgbaImage;

use doodle_core::{floor_pow2, is_pow2, DoodleError, SamplerParams};

use crate::gpu::{Gpu, PixelFormat, Region, TextureId, TextureUnit};

/// 1×1 opaque black.
pub const FALLBACK_PIXEL: [u8; 4] = [0, 0, 0, 255];

#[derive(Debug, Clone, PartialEq)]
pub struct TextureOptions {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub flip_y: bool,
    /// Raw bytes uploaded when no pixel source is given.
    pub buffer: Vec<u8>,
    pub sampler: SamplerParams,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            format: PixelFormat::Rgba,
            width: 1,
            height: 1,
            flip_y: true,
            buffer: FALLBACK_PIXEL.to_vec(),
            sampler: SamplerParams::default(),
        }
    }
}

/// Partial options for one [`TextureBinding::update`] call.
///
/// Offsets apply to this call only and select a sub-region upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextureUpdate<'a> {
    pub pixels: Option<&'a RgbaImage>,
    pub buffer: Option<&'a [u8]>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x_offset: Option<u32>,
    pub y_offset: Option<u32>,
    pub format: Option<PixelFormat>,
    pub flip_y: Option<bool>,
    pub sampler: Option<SamplerParams>,
}

impl<'a> TextureUpdate<'a> {
    pub fn pixels(image: &'a RgbaImage) -> Self {
        Self {
            pixels: Some(image),
            ..Self::default()
        }
    }

    pub fn buffer(bytes: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            buffer: Some(bytes),
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn at(mut self, x: u32, y: u32) -> Self {
        self.x_offset = Some(x);
        self.y_offset = Some(y);
        self
    }

    pub fn with_sampler(mut self, sampler: SamplerParams) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn has_offset(&self) -> bool {
        self.x_offset.is_some() || self.y_offset.is_some()
    }

    fn region(&self, width: u32, height: u32) -> Region {
        Region {
            x: self.x_offset.unwrap_or(0),
            y: self.y_offset.unwrap_or(0),
            width,
            height,
        }
    }
}

static NEXT_SCRATCH: AtomicU64 = AtomicU64::new(1);

/// Power-of-two staging image for sources the sampler cannot take as is.
#[derive(Debug)]
struct ScratchCanvas {
    id: u64,
    image: RgbaImage,
}

impl ScratchCanvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            id: NEXT_SCRATCH.fetch_add(1, Ordering::Relaxed),
            image: RgbaImage::new(width, height),
        }
    }

    /// Scale `src` into the canvas, resizing the canvas to `width×height` first.
    /// The pixel buffer is reused across frames.
    fn draw(&mut self, src: &RgbaImage, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            let mut raw = std::mem::take(&mut self.image).into_raw();
            raw.resize(width as usize * height as usize * 4, 0);
            self.image = RgbaImage::from_raw(width, height, raw).unwrap_or_else(|| RgbaImage::new(width, height));
        }
        let (sx, sy) = (1.0 / width as f32, 1.0 / height as f32);
        for (x, y, px) in self.image.enumerate_pixels_mut() {
            let u = (x as f32 + 0.5) * sx;
            let v = (y as f32 + 0.5) * sy;
            if let Some(sample) = imageops::sample_bilinear(src, u, v) {
                *px = sample;
            }
        }
    }
}

#[derive(Debug)]
pub struct TextureBinding {
    unit: TextureUnit,
    texture: Option<TextureId>,
    options: TextureOptions,
    scratch: Option<ScratchCanvas>,
    pow2_warned: bool,
    uploaded: Option<(u32, u32)>,
}

impl TextureBinding {
    /// Create the GPU texture and upload the initial options.
    pub fn new(gpu: &dyn Gpu, unit: TextureUnit, options: TextureOptions) -> Result<Self, DoodleError> {
        let texture = gpu.create_texture()?;
        let mut binding = Self {
            unit,
            texture: Some(texture),
            options,
            scratch: None,
            pow2_warned: false,
            uploaded: None,
        };
        binding.update(gpu, TextureUpdate::default());
        Ok(binding)
    }

    pub fn unit(&self) -> TextureUnit {
        self.unit
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn options(&self) -> &TextureOptions {
        &self.options
    }

    /// Size of the last image that reached the GPU (after any pow2 rescale).
    pub fn uploaded_size(&self) -> Option<(u32, u32)> {
        self.uploaded
    }

    /// Identity of the staging canvas, if one was ever needed.
    pub fn scratch_id(&self) -> Option<u64> {
        self.scratch.as_ref().map(|s| s.id)
    }

    pub fn scratch_size(&self) -> Option<(u32, u32)> {
        self.scratch.as_ref().map(|s| s.image.dimensions())
    }

    fn bind(&self, gpu: &dyn Gpu) -> bool {
        let Some(texture) = self.texture else {
            return false;
        };
        gpu.active_texture(self.unit);
        gpu.bind_texture(Some(texture));
        gpu.set_sampler(&self.options.sampler);
        true
    }

    /// Merge `patch` into the options and upload.
    ///
    /// A pixel source with a zero dimension is skipped (the previous upload
    /// stays). Sources the sampler would need as power of two are scaled into
    /// the staging canvas. A raw buffer whose length does not match its
    /// dimensions falls back to 1×1 black.
    pub fn update(&mut self, gpu: &dyn Gpu, patch: TextureUpdate<'_>) {
        if let Some(format) = patch.format {
            self.options.format = format;
        }
        if let Some(flip_y) = patch.flip_y {
            self.options.flip_y = flip_y;
        }
        if let Some(sampler) = patch.sampler {
            self.options.sampler = sampler;
        }
        if !patch.has_offset() {
            if let Some(w) = patch.width {
                self.options.width = w;
            }
            if let Some(h) = patch.height {
                self.options.height = h;
            }
        }

        if !self.bind(gpu) {
            return;
        }

        let format = self.options.format;
        let flip_y = self.options.flip_y;

        if let Some(pixels) = patch.pixels {
            let (w, h) = pixels.dimensions();
            if w == 0 || h == 0 {
                tracing::warn!(unit = self.unit.index(), "texture source has zero size; upload skipped");
                return;
            }
            if !patch.has_offset() {
                self.options.width = w;
                self.options.height = h;
            }

            let (uploaded_w, uploaded_h) = if self.options.sampler.needs_pow2() && !(is_pow2(w) && is_pow2(h)) {
                let (pw, ph) = (floor_pow2(w), floor_pow2(h));
                if !self.pow2_warned {
                    self.pow2_warned = true;
                    tracing::warn!(
                        width = w,
                        height = h,
                        scaled_width = pw,
                        scaled_height = ph,
                        "texture is not power of two for its sampler; rescaling"
                    );
                }
                let scratch = self.scratch.get_or_insert_with(|| ScratchCanvas::new(pw, ph));
                scratch.draw(pixels, pw, ph);
                upload(gpu, &patch, PixelFormat::Rgba, pw, ph, scratch.image.as_raw(), flip_y);
                (pw, ph)
            } else {
                upload(gpu, &patch, PixelFormat::Rgba, w, h, pixels.as_raw(), flip_y);
                (w, h)
            };
            self.uploaded = Some((uploaded_w, uploaded_h));

            if is_pow2(uploaded_w) && is_pow2(uploaded_h) && self.options.sampler.min_filter.is_mipmap() {
                gpu.generate_mipmap();
            }
            return;
        }

        let (w, h) = if patch.has_offset() {
            (
                patch.width.unwrap_or(self.options.width),
                patch.height.unwrap_or(self.options.height),
            )
        } else {
            (self.options.width, self.options.height)
        };
        if let Some(bytes) = patch.buffer {
            if w == 0 || h == 0 {
                tracing::warn!(unit = self.unit.index(), "texture buffer has zero size; upload skipped");
                return;
            }
            if bytes.len() != expected_len(format, w, h) {
                self.fallback(gpu, bytes.len());
                return;
            }
            upload(gpu, &patch, format, w, h, bytes, flip_y);
            if !patch.has_offset() {
                self.options.buffer.clear();
                self.options.buffer.extend_from_slice(bytes);
            }
        } else {
            if self.options.buffer.len() != expected_len(format, w, h) {
                let len = self.options.buffer.len();
                self.fallback(gpu, len);
                return;
            }
            upload(gpu, &patch, format, w, h, &self.options.buffer, flip_y);
        }
        if !patch.has_offset() {
            self.uploaded = Some((w, h));
        }
    }

    fn fallback(&mut self, gpu: &dyn Gpu, got: usize) {
        tracing::warn!(
            unit = self.unit.index(),
            width = self.options.width,
            height = self.options.height,
            bytes = got,
            "texture buffer does not match its size; using 1x1 black"
        );
        self.options.format = PixelFormat::Rgba;
        self.options.width = 1;
        self.options.height = 1;
        self.options.buffer = FALLBACK_PIXEL.to_vec();
        gpu.tex_image_2d(PixelFormat::Rgba, 1, 1, Some(&FALLBACK_PIXEL), false);
        self.uploaded = Some((1, 1));
    }

    /// Rebind and re-apply sampler state without uploading.
    pub fn shallow(&self, gpu: &dyn Gpu) {
        self.bind(gpu);
    }

    pub fn dispose(&mut self, gpu: &dyn Gpu) {
        if let Some(texture) = self.texture.take() {
            gpu.delete_texture(texture);
        }
        self.scratch = None;
    }
}

fn expected_len(format: PixelFormat, width: u32, height: u32) -> usize {
    width as usize * height as usize * format.channels()
}

fn upload(
    gpu: &dyn Gpu,
    patch: &TextureUpdate<'_>,
    format: PixelFormat,
    width: u32,
    height: u32,
    bytes: &[u8],
    flip_y: bool,
) {
    if patch.has_offset() {
        gpu.tex_sub_image_2d(format, patch.region(width, height), bytes, flip_y);
    } else {
        gpu.tex_image_2d(format, width, height, Some(bytes), flip_y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingGpu;
    use doodle_core::{Filter, Wrap};

    fn binding(gpu: &RecordingGpu, sampler: SamplerParams) -> TextureBinding {
        TextureBinding::new(
            gpu,
            TextureUnit(2),
            TextureOptions {
                sampler,
                ..TextureOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn starts_as_one_black_pixel() {
        let gpu = RecordingGpu::new();
        let b = binding(&gpu, SamplerParams::default());
        let rec = gpu.texture(b.texture().unwrap()).unwrap();
        assert_eq!((rec.width, rec.height), (1, 1));
        assert_eq!(rec.full_uploads, 1);
        assert!(rec.flip_y);
    }

    #[test]
    fn non_pow2_is_scaled_down_into_a_reused_canvas() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::default());

        let img = RgbaImage::new(300, 200);
        b.update(&gpu, TextureUpdate::pixels(&img));
        assert_eq!(b.uploaded_size(), Some((256, 128)));
        let first = b.scratch_id();
        assert!(first.is_some());

        b.update(&gpu, TextureUpdate::pixels(&img));
        assert_eq!(b.scratch_id(), first);

        let bigger = RgbaImage::new(600, 600);
        b.update(&gpu, TextureUpdate::pixels(&bigger));
        assert_eq!(b.scratch_id(), first);
        assert_eq!(b.scratch_size(), Some((512, 512)));
    }

    #[test]
    fn scratch_pixels_are_scaled_in_place() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::default());
        let img = RgbaImage::from_pixel(300, 200, image::Rgba([10, 20, 30, 255]));

        b.update(&gpu, TextureUpdate::pixels(&img));
        let buffer = b.scratch.as_ref().map(|s| s.image.as_ptr());
        b.update(&gpu, TextureUpdate::pixels(&img));
        let scratch = b.scratch.as_ref().unwrap();
        assert_eq!(Some(scratch.image.as_ptr()), buffer);
        assert!(scratch.image.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn clamp_linear_keeps_native_size() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::CLAMP_LINEAR);
        let img = RgbaImage::new(300, 200);
        b.update(&gpu, TextureUpdate::pixels(&img));
        assert_eq!(b.uploaded_size(), Some((300, 200)));
        assert_eq!(b.scratch_id(), None);
        assert_eq!(gpu.texture(b.texture().unwrap()).unwrap().mipmaps, 0);
    }

    #[test]
    fn mipmaps_only_for_pow2_with_mipmap_filter() {
        let gpu = RecordingGpu::new();
        let mut b = binding(
            &gpu,
            SamplerParams {
                wrap_s: Wrap::Repeat,
                wrap_t: Wrap::Repeat,
                min_filter: Filter::LinearMipmapLinear,
                mag_filter: Filter::Linear,
            },
        );
        b.update(&gpu, TextureUpdate::pixels(&RgbaImage::new(64, 64)));
        let id = b.texture().unwrap();
        assert_eq!(gpu.texture(id).unwrap().mipmaps, 1);

        b.update(&gpu, TextureUpdate::pixels(&RgbaImage::new(64, 64)).with_sampler(SamplerParams::CLAMP_LINEAR));
        assert_eq!(gpu.texture(id).unwrap().mipmaps, 1);
    }

    #[test]
    fn zero_sized_source_keeps_previous_upload() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::CLAMP_LINEAR);
        b.update(&gpu, TextureUpdate::pixels(&RgbaImage::new(8, 8)));
        b.update(&gpu, TextureUpdate::pixels(&RgbaImage::new(0, 8)));
        assert_eq!(b.uploaded_size(), Some((8, 8)));
        assert_eq!(gpu.texture(b.texture().unwrap()).unwrap().full_uploads, 2);
    }

    #[test]
    fn offsets_select_sub_upload() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::CLAMP_NEAREST);
        let full = vec![0u8; 4 * 2];
        b.update(&gpu, TextureUpdate::buffer(&full, 4, 2).with_format(PixelFormat::Luminance));
        let row = vec![7u8; 4];
        b.update(&gpu, TextureUpdate::buffer(&row, 4, 1).at(0, 1));
        let rec = gpu.texture(b.texture().unwrap()).unwrap();
        assert_eq!(rec.sub_uploads, 1);
        assert_eq!(rec.full_uploads, 2);
    }

    #[test]
    fn malformed_buffer_falls_back_to_black() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::CLAMP_NEAREST);
        b.update(&gpu, TextureUpdate::buffer(&[1, 2, 3], 2, 2));
        assert_eq!(b.options().buffer, FALLBACK_PIXEL.to_vec());
        assert_eq!(b.uploaded_size(), Some((1, 1)));
    }

    #[test]
    fn shallow_reapplies_sampler_without_upload() {
        let gpu = RecordingGpu::new();
        let b = binding(&gpu, SamplerParams::CLAMP_NEAREST);
        let before = gpu.texture(b.texture().unwrap()).unwrap().full_uploads;
        b.shallow(&gpu);
        let rec = gpu.texture(b.texture().unwrap()).unwrap();
        assert_eq!(rec.full_uploads, before);
        assert_eq!(rec.sampler, Some(SamplerParams::CLAMP_NEAREST));
    }

    #[test]
    fn dispose_frees_texture() {
        let gpu = RecordingGpu::new();
        let mut b = binding(&gpu, SamplerParams::default());
        b.dispose(&gpu);
        assert_eq!(gpu.live_textures(), 0);
        b.update(&gpu, TextureUpdate::default());
        assert_eq!(gpu.live_textures(), 0);
    }
}
