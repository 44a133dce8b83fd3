//! Audio analysis texture: frequency bytes in row 0, waveform bytes in row 1.

use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use doodle_core::{AudioConfig, DoodleError, SamplerParams};
use doodle_input_audio::{decode_audio, AudioAnalyser, AudioClip, AudioError, Playback, SampleSource};
use doodle_loader::{fetch_bytes, LoadError, Liveness, Pending};

use crate::audio_gate::AudioGate;
use crate::gpu::{Gpu, PixelFormat, TextureUnit};
use crate::program::TextureInput;
use crate::source::SourceRegistry;
use crate::texture::{TextureBinding, TextureOptions, TextureUpdate};
use crate::uniform::UniformTable;

pub const FFT_SIZE: usize = 1024;
pub const BIN_COUNT: usize = FFT_SIZE / 2;

static NEXT_AUDIO_NAME: AtomicU32 = AtomicU32::new(0);

/// Generated sampler name for an audio input declared without one.
pub fn next_audio_name() -> String {
    format!("u_audio{}", NEXT_AUDIO_NAME.fetch_add(1, Ordering::Relaxed))
}

enum AudioSource {
    Loading(Pending<AudioClip>),
    Clip(Playback),
    Feed(Rc<dyn SampleSource>),
    Silent,
}

impl AudioSource {
    fn kind(&self) -> &'static str {
        match self {
            AudioSource::Loading(_) => "loading",
            AudioSource::Clip(_) => "clip",
            AudioSource::Feed(_) => "feed",
            AudioSource::Silent => "silent",
        }
    }
}

pub struct AudioTexture {
    name: String,
    binding: TextureBinding,
    analyser: AudioAnalyser,
    window: Vec<f32>,
    freq: Vec<u8>,
    wave: Vec<u8>,
    looped: bool,
    source: AudioSource,
    gate: AudioGate,
    liveness: Liveness,
}

impl std::fmt::Debug for AudioTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTexture")
            .field("name", &self.name)
            .field("unit", &self.binding.unit())
            .field("source", &self.source.kind())
            .finish()
    }
}

fn extension_of(src: &str) -> Option<String> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

impl AudioTexture {
    pub fn new(
        gpu: &dyn Gpu,
        unit: TextureUnit,
        name: impl Into<String>,
        cfg: &AudioConfig,
        sources: &SourceRegistry,
        gate: &AudioGate,
    ) -> Result<Self, DoodleError> {
        let name = name.into();
        let binding = TextureBinding::new(
            gpu,
            unit,
            TextureOptions {
                format: PixelFormat::Luminance,
                width: BIN_COUNT as u32,
                height: 2,
                flip_y: false,
                buffer: vec![0; BIN_COUNT * 2],
                sampler: SamplerParams::CLAMP_NEAREST,
            },
        )?;

        let liveness = Liveness::new();

        let src = cfg.src.as_deref().unwrap_or("").trim();
        let source = if cfg.mic {
            tracing::warn!(audio = %name, error = %AudioError::MicUnsupported, "audio input stays silent");
            AudioSource::Silent
        } else if src.starts_with('#') {
            match sources.audio(src) {
                Some(feed) => AudioSource::Feed(feed),
                None => {
                    tracing::warn!(audio = %name, src, "no audio feed registered under this reference");
                    AudioSource::Silent
                }
            }
        } else if !src.is_empty() {
            if let Some(origin) = &cfg.cross_origin {
                tracing::debug!(audio = %name, cross_origin = %origin, "cross-origin mode has no effect on direct fetches");
            }
            let url = src.to_string();
            AudioSource::Loading(Pending::spawn(liveness.clone(), src, move || {
                let bytes = fetch_bytes(&url)?;
                decode_audio(bytes, extension_of(&url).as_deref()).map_err(|e| LoadError::Decode(e.to_string()))
            }))
        } else {
            AudioSource::Silent
        };

        tracing::debug!(audio = %name, unit = unit.index(), source = source.kind(), "audio input ready");
        Ok(Self {
            name,
            binding,
            analyser: AudioAnalyser::new(FFT_SIZE),
            window: vec![0.0; FFT_SIZE],
            freq: vec![0; BIN_COUNT],
            wave: vec![0; BIN_COUNT],
            looped: cfg.looped,
            source,
            gate: gate.clone(),
            liveness,
        })
    }

    /// Build from an already decoded clip (tests, embedded assets).
    pub fn with_clip(
        gpu: &dyn Gpu,
        unit: TextureUnit,
        name: impl Into<String>,
        clip: AudioClip,
        looped: bool,
        gate: &AudioGate,
    ) -> Result<Self, DoodleError> {
        let mut tex = Self::new(gpu, unit, name, &AudioConfig::default(), &SourceRegistry::new(), gate)?;
        tex.looped = looped;
        tex.source = AudioSource::Clip(Playback::new(clip, looped));
        Ok(tex)
    }

    pub fn binding(&self) -> &TextureBinding {
        &self.binding
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.source, AudioSource::Loading(_))
    }

    /// Whether this frame's analysis should be uploaded.
    pub fn should_update(&self) -> bool {
        match &self.source {
            AudioSource::Clip(p) => p.is_started(),
            AudioSource::Feed(feed) => feed.is_playing(),
            AudioSource::Loading(_) | AudioSource::Silent => false,
        }
    }

    fn poll(&mut self) {
        if let AudioSource::Loading(pending) = &mut self.source {
            match pending.try_take() {
                Some(Ok(clip)) => {
                    tracing::debug!(audio = %self.name, secs = clip.duration_secs(), "audio decoded");
                    self.source = AudioSource::Clip(Playback::new(clip, self.looped));
                }
                Some(Err(e)) => {
                    tracing::warn!(audio = %self.name, error = %e, "failed loading audio");
                    self.source = AudioSource::Silent;
                }
                None => {}
            }
        }
        if let AudioSource::Clip(playback) = &mut self.source {
            if self.gate.is_unlocked() && !playback.is_started() {
                playback.start();
            }
        }
    }

    fn analyse(&mut self) {
        let filled = match &self.source {
            AudioSource::Clip(p) => p.latest_samples(&mut self.window),
            AudioSource::Feed(feed) => feed.latest_samples(&mut self.window),
            _ => 0,
        };
        if filled == 0 {
            self.analyser.analyse_silence();
        } else {
            self.analyser.analyse(&self.window);
        }
        self.analyser.byte_frequency_data(&mut self.freq);
        self.analyser.byte_time_domain_data(&mut self.wave);
    }

    /// Current analysis rows (frequency, waveform).
    pub fn rows(&self) -> (&[u8], &[u8]) {
        (&self.freq, &self.wave)
    }
}

impl TextureInput for AudioTexture {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit(&self) -> TextureUnit {
        self.binding.unit()
    }

    fn update(&mut self, gpu: &dyn Gpu, uniforms: &mut UniformTable) {
        self.poll();
        uniforms.set_sampler(gpu, &self.name, self.binding.unit());

        if !self.should_update() {
            return;
        }
        self.analyse();
        let width = BIN_COUNT as u32;
        self.binding
            .update(gpu, TextureUpdate::buffer(&self.freq, width, 1).at(0, 0));
        self.binding
            .update(gpu, TextureUpdate::buffer(&self.wave, width, 1).at(0, 1));
    }

    fn dispose(&mut self, gpu: &dyn Gpu) {
        self.liveness.kill();
        self.source = AudioSource::Silent;
        self.binding.dispose(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::compile_program;
    use crate::testing::RecordingGpu;
    use std::cell::Cell;

    struct Tone {
        playing: Cell<bool>,
    }

    impl SampleSource for Tone {
        fn is_playing(&self) -> bool {
            self.playing.get()
        }

        fn latest_samples(&self, out: &mut [f32]) -> usize {
            for (i, s) in out.iter_mut().enumerate() {
                *s = (i as f32 * 0.3).sin() * 0.5;
            }
            out.len()
        }
    }

    fn table(gpu: &RecordingGpu) -> UniformTable {
        let p = compile_program(gpu, "attribute vec2 position;\nvoid main(){}", "uniform sampler2D u_audio;\nvoid main(){}")
            .unwrap();
        gpu.use_program(Some(p));
        UniformTable::introspect(gpu, p)
    }

    #[test]
    fn texture_is_bins_by_two_luminance() {
        let gpu = RecordingGpu::new();
        let tex = AudioTexture::new(
            &gpu,
            TextureUnit(3),
            "u_audio",
            &AudioConfig::default(),
            &SourceRegistry::new(),
            &AudioGate::new(),
        )
        .unwrap();
        let rec = gpu.texture(tex.binding().texture().unwrap()).unwrap();
        assert_eq!((rec.width, rec.height), (512, 2));
        assert_eq!(rec.format, PixelFormat::Luminance);
        assert_eq!(rec.sampler, Some(SamplerParams::CLAMP_NEAREST));
    }

    #[test]
    fn feed_uploads_two_rows_only_while_playing() {
        let gpu = RecordingGpu::new();
        let tone = Rc::new(Tone { playing: Cell::new(false) });
        let mut reg = SourceRegistry::new();
        reg.register_audio("#player", tone.clone());

        let cfg = AudioConfig {
            src: Some("#player".into()),
            ..AudioConfig::default()
        };
        let mut tex = AudioTexture::new(&gpu, TextureUnit(0), "u_audio", &cfg, &reg, &AudioGate::new()).unwrap();
        let id = tex.binding().texture().unwrap();
        let mut uniforms = table(&gpu);

        tex.update(&gpu, &mut uniforms);
        assert_eq!(gpu.texture(id).unwrap().sub_uploads, 0);
        assert_eq!(gpu.last_upload("u_audio"), Some(doodle_core::UniformValue::Int(0)));

        tone.playing.set(true);
        tex.update(&gpu, &mut uniforms);
        assert_eq!(gpu.texture(id).unwrap().sub_uploads, 2);
        let (freq, wave) = tex.rows();
        assert!(freq.iter().any(|b| *b > 0));
        assert!(wave.iter().any(|b| *b != 128));
    }

    #[test]
    fn clip_waits_for_the_gate() {
        let gpu = RecordingGpu::new();
        let gate = AudioGate::new();
        let clip = AudioClip::new(vec![0.25; 44_100], 44_100);
        let mut tex = AudioTexture::with_clip(&gpu, TextureUnit(0), "u_audio", clip, true, &gate).unwrap();
        let mut uniforms = table(&gpu);

        tex.update(&gpu, &mut uniforms);
        assert!(!tex.should_update());

        gate.unlock();
        tex.update(&gpu, &mut uniforms);
        assert!(tex.should_update());
        let rec = gpu.texture(tex.binding().texture().unwrap()).unwrap();
        assert_eq!(rec.sub_uploads, 2);
    }

    #[test]
    fn disposed_inputs_leave_nothing_on_the_gate() {
        let gpu = RecordingGpu::new();
        let gate = AudioGate::new();
        for _ in 0..10 {
            let clip = AudioClip::new(vec![0.0; 64], 44_100);
            let mut tex = AudioTexture::with_clip(&gpu, TextureUnit(0), "u_audio", clip, false, &gate).unwrap();
            tex.dispose(&gpu);
        }
        assert_eq!(gate.pending_callbacks(), 0);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn mic_is_silent() {
        let gpu = RecordingGpu::new();
        let cfg = AudioConfig {
            mic: true,
            ..AudioConfig::default()
        };
        let tex = AudioTexture::new(&gpu, TextureUnit(0), "u_audio", &cfg, &SourceRegistry::new(), &AudioGate::new())
            .unwrap();
        assert!(!tex.should_update());
    }

    #[test]
    fn query_strings_do_not_hide_extensions() {
        assert_eq!(extension_of("https://a.test/song.MP3?x=1").as_deref(), Some("mp3"));
        assert_eq!(extension_of("noext").as_deref(), None);
    }
}
