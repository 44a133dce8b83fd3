//! Image, video, camera and host-canvas textures.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

use image::RgbaImage;
use regex::Regex;

use doodle_core::{DoodleError, Filter, SamplerParams, TextureConfig, UniformValue, Wrap};
use doodle_input_video::{VideoConfig, VideoDecoder};
use doodle_input_webcam::WebcamFeed;
use doodle_loader::{load_image, Liveness, Pending};

use crate::gpu::{Gpu, TextureUnit};
use crate::program::TextureInput;
use crate::source::{RawFrame, SharedCanvas, SourceRegistry, TextureSource};
use crate::texture::{TextureBinding, TextureOptions, TextureUpdate};
use crate::uniform::UniformTable;

const CAMERA_SIZE: (u32, u32) = (320, 240);

fn image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\w+\.(jpg|jpeg|png|gif|bmp)(\?|$)").expect("static regex"))
}

fn video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\w+\.(mp4|3gp|webm|ogv)(\?|$)").expect("static regex"))
}

pub fn is_image_src(src: &str) -> bool {
    image_re().is_match(src)
}

pub fn is_video_src(src: &str) -> bool {
    video_re().is_match(src)
}

/// Sampler declared on a texture element: repeat, trilinear.
pub fn configured_sampler(cfg: &TextureConfig) -> SamplerParams {
    SamplerParams {
        wrap_s: cfg.wrap_s.unwrap_or(Wrap::Repeat),
        wrap_t: cfg.wrap_t.unwrap_or(Wrap::Repeat),
        min_filter: cfg.min_filter.unwrap_or(Filter::LinearMipmapLinear),
        mag_filter: cfg.mag_filter.unwrap_or(Filter::Linear),
    }
}

enum Media {
    Loading(Pending<RgbaImage>),
    Image(Rc<RgbaImage>),
    Canvas(SharedCanvas),
    Video {
        decoder: Rc<VideoDecoder>,
        seen: Option<u64>,
    },
    Camera {
        feed: Rc<WebcamFeed>,
        seen: Option<u64>,
    },
    Raw {
        frame: Rc<RefCell<RawFrame>>,
        version: u64,
    },
    Missing,
}

impl Media {
    fn kind(&self) -> &'static str {
        match self {
            Media::Loading(_) => "loading",
            Media::Image(_) => "image",
            Media::Canvas(_) => "canvas",
            Media::Video { .. } => "video",
            Media::Camera { .. } => "camera",
            Media::Raw { .. } => "raw",
            Media::Missing => "missing",
        }
    }
}

pub struct MediaTexture {
    name: String,
    resolution_name: String,
    resolution: [f32; 2],
    binding: TextureBinding,
    sampler: SamplerParams,
    force_update: bool,
    /// Streams switch to clamp/linear once, on their first frame.
    stream_ready: bool,
    media: Media,
    liveness: Liveness,
}

impl std::fmt::Debug for MediaTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTexture")
            .field("name", &self.name)
            .field("unit", &self.binding.unit())
            .field("media", &self.media.kind())
            .field("resolution", &self.resolution)
            .finish()
    }
}

impl MediaTexture {
    /// Resolve the source for `cfg` and create its texture on `unit`.
    ///
    /// Source failures are logged and leave a 1×1 black texture; only GPU
    /// object creation is an error.
    pub fn new(
        gpu: &dyn Gpu,
        unit: TextureUnit,
        name: impl Into<String>,
        cfg: &TextureConfig,
        sources: &SourceRegistry,
    ) -> Result<Self, DoodleError> {
        let name = name.into();
        let binding = TextureBinding::new(gpu, unit, TextureOptions::default())?;
        let mut tex = Self {
            resolution_name: format!("{name}_resolution"),
            name,
            resolution: [0.0; 2],
            binding,
            sampler: configured_sampler(cfg),
            force_update: cfg.force_update,
            stream_ready: false,
            media: Media::Missing,
            liveness: Liveness::new(),
        };
        tex.media = tex.open(gpu, cfg, sources);
        tracing::debug!(texture = %tex.name, unit = unit.index(), media = tex.media.kind(), "texture input ready");
        Ok(tex)
    }

    fn open(&mut self, gpu: &dyn Gpu, cfg: &TextureConfig, sources: &SourceRegistry) -> Media {
        let src = cfg.src.as_deref().unwrap_or("").trim();

        if cfg.webcam {
            let (w, h) = CAMERA_SIZE;
            return match WebcamFeed::start(0, w, h) {
                Ok(feed) => Media::Camera {
                    feed: Rc::new(feed),
                    seen: None,
                },
                Err(e) => {
                    tracing::warn!(texture = %self.name, error = %e, "camera unavailable");
                    Media::Missing
                }
            };
        }

        if is_video_src(src) {
            return match VideoDecoder::from_config(VideoConfig::new(src)) {
                Ok(decoder) => Media::Video {
                    decoder: Rc::new(decoder),
                    seen: None,
                },
                Err(e) => {
                    tracing::warn!(texture = %self.name, src, error = %e, "video unavailable");
                    Media::Missing
                }
            };
        }

        if is_image_src(src) {
            let url = src.to_string();
            return Media::Loading(Pending::spawn(self.liveness.clone(), src, move || load_image(&url)));
        }

        match sources.texture(src) {
            Some(TextureSource::Image(img)) => {
                self.on_image(gpu, &img);
                Media::Image(img)
            }
            Some(TextureSource::Canvas(canvas)) => {
                self.on_image(gpu, &canvas.borrow());
                Media::Canvas(canvas)
            }
            Some(TextureSource::Video(decoder)) => Media::Video { decoder, seen: None },
            Some(TextureSource::Camera(feed)) => Media::Camera { feed, seen: None },
            Some(TextureSource::Raw(frame)) => {
                let version = self.on_raw(gpu, &frame.borrow());
                Media::Raw { frame, version }
            }
            None => {
                tracing::warn!(texture = %self.name, src, "no texture source registered under this reference");
                Media::Missing
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> &TextureBinding {
        &self.binding
    }

    pub fn resolution(&self) -> [f32; 2] {
        self.resolution
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.media, Media::Loading(_))
    }

    /// Upload a static image with the declared sampler.
    fn on_image(&mut self, gpu: &dyn Gpu, img: &RgbaImage) {
        let (w, h) = img.dimensions();
        self.resolution = [w as f32, h as f32];
        self.binding
            .update(gpu, TextureUpdate::pixels(img).with_sampler(self.sampler));
    }

    fn on_raw(&mut self, gpu: &dyn Gpu, frame: &RawFrame) -> u64 {
        self.resolution = [frame.width as f32, frame.height as f32];
        self.binding.update(
            gpu,
            TextureUpdate::buffer(&frame.bytes, frame.width, frame.height)
                .with_format(frame.format)
                .with_sampler(self.sampler),
        );
        frame.version()
    }

    fn on_stream_frame(&mut self, gpu: &dyn Gpu, width: u32, height: u32, bytes: Vec<u8>) {
        if !self.stream_ready {
            self.stream_ready = true;
            self.sampler = SamplerParams {
                mag_filter: self.sampler.mag_filter,
                ..SamplerParams::CLAMP_LINEAR
            };
        }
        self.resolution = [width as f32, height as f32];
        match RgbaImage::from_raw(width, height, bytes) {
            Some(img) => self
                .binding
                .update(gpu, TextureUpdate::pixels(&img).with_sampler(self.sampler)),
            None => {
                tracing::warn!(texture = %self.name, width, height, "stream frame has the wrong size; skipped");
                self.binding.shallow(gpu);
            }
        }
    }

    fn poll_load(&mut self, gpu: &dyn Gpu) {
        let Media::Loading(pending) = &mut self.media else {
            return;
        };
        match pending.try_take() {
            Some(Ok(img)) => {
                let img = Rc::new(img);
                self.on_image(gpu, &img);
                self.media = Media::Image(img);
            }
            Some(Err(e)) => {
                tracing::warn!(texture = %self.name, error = %e, "failed loading texture source");
                self.media = Media::Missing;
            }
            None => {}
        }
    }
}

impl TextureInput for MediaTexture {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit(&self) -> TextureUnit {
        self.binding.unit()
    }

    fn update(&mut self, gpu: &dyn Gpu, uniforms: &mut UniformTable) {
        self.poll_load(gpu);

        uniforms.set_sampler(gpu, &self.name, self.binding.unit());
        uniforms.set(gpu, &self.resolution_name, &UniformValue::Vec2(self.resolution));

        let force = self.force_update;
        match &mut self.media {
            Media::Video { decoder, seen } => {
                if let Some(frame) = decoder.frame_after(*seen) {
                    *seen = Some(frame.serial);
                    self.on_stream_frame(gpu, frame.width, frame.height, frame.bytes);
                    return;
                }
            }
            Media::Camera { feed, seen } => {
                if let Some(frame) = feed.frame_after(*seen) {
                    *seen = Some(frame.serial);
                    self.on_stream_frame(gpu, frame.width, frame.height, frame.bytes);
                    return;
                }
            }
            Media::Raw { frame, version } => {
                let current = frame.borrow().version();
                if force || current != *version {
                    let frame = Rc::clone(frame);
                    let v = self.on_raw(gpu, &frame.borrow());
                    if let Media::Raw { version, .. } = &mut self.media {
                        *version = v;
                    }
                    return;
                }
            }
            Media::Image(img) if force => {
                let img = Rc::clone(img);
                self.on_image(gpu, &img);
                return;
            }
            Media::Canvas(canvas) if force => {
                let canvas = Rc::clone(canvas);
                self.on_image(gpu, &canvas.borrow());
                return;
            }
            _ => {}
        }
        self.binding.shallow(gpu);
    }

    fn dispose(&mut self, gpu: &dyn Gpu) {
        self.liveness.kill();
        self.media = Media::Missing;
        self.binding.dispose(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::PixelFormat;
    use crate::testing::RecordingGpu;
    use crate::gpu::compile_program;

    fn table(gpu: &RecordingGpu) -> UniformTable {
        let fs = "uniform sampler2D u_tex;\nuniform vec2 u_tex_resolution;\nvoid main(){}";
        let p = compile_program(gpu, "attribute vec2 position;\nvoid main(){}", fs).unwrap();
        gpu.use_program(Some(p));
        UniformTable::introspect(gpu, p)
    }

    fn cfg(src: &str) -> TextureConfig {
        TextureConfig {
            src: Some(src.to_string()),
            ..TextureConfig::default()
        }
    }

    #[test]
    fn source_kind_sniffing() {
        assert!(is_image_src("photos/cat.JPG"));
        assert!(is_image_src("https://x.test/a.png?v=2"));
        assert!(!is_image_src("a.png.txt"));
        assert!(is_video_src("clip.webm"));
        assert!(!is_video_src("#canvas"));
    }

    #[test]
    fn registered_canvas_uploads_on_setup_then_only_when_forced() {
        let gpu = RecordingGpu::new();
        let mut reg = SourceRegistry::new();
        let canvas: SharedCanvas = Rc::new(RefCell::new(RgbaImage::new(64, 32)));
        reg.register_texture("canvas", TextureSource::Canvas(canvas));

        let mut tex = MediaTexture::new(&gpu, TextureUnit(1), "u_tex", &cfg("#canvas"), &reg).unwrap();
        let id = tex.binding().texture().unwrap();
        assert_eq!(gpu.texture(id).unwrap().full_uploads, 2);

        let mut uniforms = table(&gpu);
        tex.update(&gpu, &mut uniforms);
        tex.update(&gpu, &mut uniforms);
        assert_eq!(gpu.texture(id).unwrap().full_uploads, 2);
        assert_eq!(gpu.last_upload("u_tex"), Some(UniformValue::Int(1)));
        assert_eq!(gpu.last_upload("u_tex_resolution"), Some(UniformValue::Vec2([64.0, 32.0])));

        let mut forced = cfg("canvas");
        forced.force_update = true;
        let mut tex = MediaTexture::new(&gpu, TextureUnit(2), "u_tex", &forced, &reg).unwrap();
        let id = tex.binding().texture().unwrap();
        tex.update(&gpu, &mut uniforms);
        tex.update(&gpu, &mut uniforms);
        assert_eq!(gpu.texture(id).unwrap().full_uploads, 4);
    }

    #[test]
    fn declared_sampler_applies_to_images() {
        let gpu = RecordingGpu::new();
        let mut reg = SourceRegistry::new();
        reg.register_texture("img", TextureSource::Image(Rc::new(RgbaImage::new(16, 16))));
        let mut c = cfg("img");
        c.wrap_s = Some(Wrap::ClampToEdge);
        c.min_filter = Some(Filter::Nearest);
        let tex = MediaTexture::new(&gpu, TextureUnit(0), "u_tex", &c, &reg).unwrap();
        let rec = gpu.texture(tex.binding().texture().unwrap()).unwrap();
        let sampler = rec.sampler.unwrap();
        assert_eq!(sampler.wrap_s, Wrap::ClampToEdge);
        assert_eq!(sampler.wrap_t, Wrap::Repeat);
        assert_eq!(sampler.min_filter, Filter::Nearest);
        assert_eq!(rec.mipmaps, 0);
    }

    #[test]
    fn raw_frames_reupload_on_new_version() {
        let gpu = RecordingGpu::new();
        let mut reg = SourceRegistry::new();
        let raw = Rc::new(RefCell::new(RawFrame::new(2, 1, PixelFormat::Luminance, vec![1, 2])));
        reg.register_texture("data", TextureSource::Raw(raw.clone()));
        let mut tex = MediaTexture::new(&gpu, TextureUnit(0), "u_tex", &cfg("data"), &reg).unwrap();
        let id = tex.binding().texture().unwrap();
        let mut uniforms = table(&gpu);

        tex.update(&gpu, &mut uniforms);
        assert_eq!(gpu.texture(id).unwrap().full_uploads, 2);
        raw.borrow_mut().set(2, 1, vec![3, 4]);
        tex.update(&gpu, &mut uniforms);
        assert_eq!(gpu.texture(id).unwrap().full_uploads, 3);
    }

    #[test]
    fn unknown_reference_stays_black() {
        let gpu = RecordingGpu::new();
        let mut tex = MediaTexture::new(&gpu, TextureUnit(0), "u_tex", &cfg("#nope"), &SourceRegistry::new()).unwrap();
        let mut uniforms = table(&gpu);
        tex.update(&gpu, &mut uniforms);
        assert_eq!(tex.resolution(), [0.0, 0.0]);
        tex.dispose(&gpu);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn missing_image_file_is_logged_not_fatal() {
        let gpu = RecordingGpu::new();
        let mut tex =
            MediaTexture::new(&gpu, TextureUnit(0), "u_tex", &cfg("/definitely/missing.png"), &SourceRegistry::new())
                .unwrap();
        let mut uniforms = table(&gpu);
        for _ in 0..400 {
            tex.update(&gpu, &mut uniforms);
            if !tex.is_loading() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!tex.is_loading());
        assert_eq!(tex.resolution(), [0.0, 0.0]);
    }
}
