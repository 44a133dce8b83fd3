//! Texture and audio sources a host registers by name.
//!
//! A texture whose `src` is not a media URL, or an audio input whose `src`
//! starts with `#`, refers to one of these (`"#name"` and `"name"` resolve
//! alike).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use image::RgbaImage;

use doodle_input_audio::SampleSource;
use doodle_input_video::VideoDecoder;
use doodle_input_webcam::WebcamFeed;

use crate::gpu::PixelFormat;

/// Host-written pixel buffer. Bump `version` (via [`RawFrame::set`]) to have
/// bound textures re-upload it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub bytes: Vec<u8>,
    version: u64,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, bytes: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            bytes,
            version: 1,
        }
    }

    pub fn set(&mut self, width: u32, height: u32, bytes: Vec<u8>) {
        self.width = width;
        self.height = height;
        self.bytes = bytes;
        self.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

pub type SharedCanvas = Rc<RefCell<RgbaImage>>;

#[derive(Clone)]
pub enum TextureSource {
    Image(Rc<RgbaImage>),
    /// Drawn by the host; re-uploaded only with `force_update`.
    Canvas(SharedCanvas),
    Video(Rc<VideoDecoder>),
    Camera(Rc<WebcamFeed>),
    Raw(Rc<RefCell<RawFrame>>),
}

impl TextureSource {
    pub fn kind(&self) -> &'static str {
        match self {
            TextureSource::Image(_) => "image",
            TextureSource::Canvas(_) => "canvas",
            TextureSource::Video(_) => "video",
            TextureSource::Camera(_) => "camera",
            TextureSource::Raw(_) => "raw",
        }
    }
}

impl fmt::Debug for TextureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextureSource").field(&self.kind()).finish()
    }
}

#[derive(Default)]
pub struct SourceRegistry {
    textures: HashMap<String, TextureSource>,
    audio: HashMap<String, Rc<dyn SampleSource>>,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("textures", &self.textures.keys().collect::<Vec<_>>())
            .field("audio", &self.audio.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn key(reference: &str) -> &str {
    reference.trim().trim_start_matches('#')
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_texture(&mut self, name: impl AsRef<str>, source: TextureSource) {
        self.textures.insert(key(name.as_ref()).to_string(), source);
    }

    pub fn register_audio(&mut self, name: impl AsRef<str>, source: Rc<dyn SampleSource>) {
        self.audio.insert(key(name.as_ref()).to_string(), source);
    }

    pub fn texture(&self, reference: &str) -> Option<TextureSource> {
        self.textures.get(key(reference)).cloned()
    }

    pub fn audio(&self, reference: &str) -> Option<Rc<dyn SampleSource>> {
        self.audio.get(key(reference)).cloned()
    }

    pub fn remove(&mut self, reference: &str) {
        self.textures.remove(key(reference));
        self.audio.remove(key(reference));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_prefix_is_optional() {
        let mut reg = SourceRegistry::new();
        reg.register_texture("#canvas", TextureSource::Canvas(Rc::new(RefCell::new(RgbaImage::new(2, 2)))));
        assert_eq!(reg.texture("canvas").map(|s| s.kind()), Some("canvas"));
        assert_eq!(reg.texture("#canvas").map(|s| s.kind()), Some("canvas"));
        reg.remove("canvas");
        assert!(reg.texture("#canvas").is_none());
    }

    #[test]
    fn raw_frames_track_versions() {
        let mut raw = RawFrame::new(1, 1, PixelFormat::Rgba, vec![0; 4]);
        let v = raw.version();
        raw.set(2, 1, vec![0; 8]);
        assert_eq!(raw.version(), v + 1);
    }
}
