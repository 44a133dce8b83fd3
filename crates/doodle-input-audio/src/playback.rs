use std::time::{Duration, Instant};

use crate::decode::AudioClip;
use crate::SampleSource;

/// Wall-clock playback cursor over a decoded clip.
///
/// There is no audio output here; the cursor only decides which samples the
/// analyser sees, so the texture tracks what a listener would be hearing.
#[derive(Debug, Clone)]
pub struct Playback {
    clip: AudioClip,
    looped: bool,
    started: Option<Instant>,
}

impl Playback {
    pub fn new(clip: AudioClip, looped: bool) -> Self {
        Self {
            clip,
            looped,
            started: None,
        }
    }

    pub fn clip(&self) -> &AudioClip {
        &self.clip
    }

    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub fn start_at(&mut self, at: Instant) {
        if self.started.is_none() {
            tracing::debug!(
                secs = self.clip.duration_secs(),
                looped = self.looped,
                "audio playback started"
            );
            self.started = Some(at);
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Sample index under the cursor at `now`, or `None` once a non-looping clip ended.
    pub fn cursor_at(&self, now: Instant) -> Option<usize> {
        let started = self.started?;
        let len = self.clip.len();
        if len == 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(started);
        let pos = (elapsed.as_secs_f64() * self.clip.sample_rate as f64) as usize;
        if self.looped {
            Some(pos % len)
        } else if pos < len {
            Some(pos)
        } else {
            None
        }
    }

    pub fn is_playing_at(&self, now: Instant) -> bool {
        self.cursor_at(now).is_some()
    }

    /// Fill `out` with the samples just before the cursor (oldest first).
    /// Returns how many were written; the rest of `out` is zeroed.
    pub fn window_at(&self, now: Instant, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let Some(cursor) = self.cursor_at(now) else {
            return 0;
        };
        let samples = &self.clip.samples;
        let n = out.len();
        if self.looped && cursor < n {
            // Wrap around the loop point.
            let head = n - cursor;
            let tail_start = samples.len().saturating_sub(head);
            let from_tail = &samples[tail_start..];
            let offset = n - cursor - from_tail.len();
            out[offset..offset + from_tail.len()].copy_from_slice(from_tail);
            out[n - cursor..].copy_from_slice(&samples[..cursor]);
            return n;
        }
        let start = cursor.saturating_sub(n);
        let src = &samples[start..cursor];
        out[n - src.len()..].copy_from_slice(src);
        src.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}

impl SampleSource for Playback {
    fn is_playing(&self) -> bool {
        self.is_playing_at(Instant::now())
    }

    fn latest_samples(&self, out: &mut [f32]) -> usize {
        self.window_at(Instant::now(), out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, rate: u32) -> AudioClip {
        AudioClip::new((0..n).map(|i| i as f32).collect(), rate)
    }

    #[test]
    fn not_playing_until_started() {
        let p = Playback::new(ramp(100, 100), false);
        assert!(!p.is_playing_at(Instant::now()));
        let mut out = [9.0; 4];
        assert_eq!(p.window_at(Instant::now(), &mut out), 0);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn one_shot_ends() {
        let mut p = Playback::new(ramp(100, 100), false);
        let t0 = Instant::now();
        p.start_at(t0);
        assert!(p.is_playing_at(t0 + Duration::from_millis(500)));
        assert!(!p.is_playing_at(t0 + Duration::from_millis(1500)));
    }

    #[test]
    fn window_trails_cursor() {
        let mut p = Playback::new(ramp(100, 100), false);
        let t0 = Instant::now();
        p.start_at(t0);
        let mut out = [0.0; 4];
        let n = p.window_at(t0 + Duration::from_millis(500), &mut out);
        assert_eq!(n, 4);
        assert_eq!(out, [46.0, 47.0, 48.0, 49.0]);
    }

    #[test]
    fn looped_window_wraps() {
        let mut p = Playback::new(ramp(10, 10), true);
        let t0 = Instant::now();
        p.start_at(t0);
        // 1.25s into a 1s loop: cursor at sample 2.
        let mut out = [0.0; 4];
        p.window_at(t0 + Duration::from_millis(1250), &mut out);
        assert_eq!(out, [8.0, 9.0, 0.0, 1.0]);
        assert!(p.is_playing_at(t0 + Duration::from_secs(30)));
    }
}
