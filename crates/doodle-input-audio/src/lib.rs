//! Audio inputs for doodle: decoding, playback cursor, and byte analysis.

pub mod analyser;
pub mod decode;
pub mod playback;

pub use analyser::AudioAnalyser;
pub use decode::{decode_audio, AudioClip};
pub use playback::Playback;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to probe/decode audio: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),

    #[error("no audio track found")]
    NoAudioTrack,

    #[error("unknown sample rate")]
    UnknownSampleRate,

    #[error("microphone capture is not supported")]
    MicUnsupported,
}

/// Anything that can hand the analyser its latest samples: a decoded clip
/// under a playback cursor, or a host-provided live feed.
pub trait SampleSource {
    fn is_playing(&self) -> bool;

    /// Write the most recent samples into `out` (oldest first) and return how
    /// many were real; the remainder must be zeroed.
    fn latest_samples(&self, out: &mut [f32]) -> usize;
}
