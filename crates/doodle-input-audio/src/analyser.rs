//! Byte-valued spectrum and waveform analysis.
//!
//! Output follows the browser `AnalyserNode` conventions so that shaders written
//! against audio textures elsewhere read the same values: Blackman window,
//! magnitude scaled by `1/N`, exponential smoothing over time, decibels mapped
//! linearly from `[min_db, max_db]` onto `0..=255`.

use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

pub struct AudioAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    /// Smoothed linear magnitudes, one per bin.
    magnitudes: Vec<f32>,
    /// Most recent analysed block, time domain.
    block: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl fmt::Debug for AudioAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_db", &self.min_db)
            .field("max_db", &self.max_db)
            .finish()
    }
}

impl Default for AudioAnalyser {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

impl AudioAnalyser {
    /// `fft_size` is rounded up to a power of two (minimum 32).
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
            })
            .collect();

        Self {
            fft,
            fft_size,
            window,
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
            magnitudes: vec![0.0; fft_size / 2],
            block: vec![0.0; fft_size],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn set_smoothing(&mut self, smoothing: f32) {
        self.smoothing = smoothing.clamp(0.0, 1.0);
    }

    /// Analyse the most recent block. Shorter input is left-padded with silence.
    pub fn analyse(&mut self, samples: &[f32]) {
        let n = self.fft_size;
        let take = samples.len().min(n);
        let pad = n - take;
        self.block[..pad].fill(0.0);
        self.block[pad..].copy_from_slice(&samples[samples.len() - take..]);

        for ((dst, s), w) in self.scratch.iter_mut().zip(&self.block).zip(&self.window) {
            *dst = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let tau = self.smoothing;
        let scale = 1.0 / n as f32;
        for (m, c) in self.magnitudes.iter_mut().zip(&self.scratch) {
            let mag = c.norm() * scale;
            *m = tau * *m + (1.0 - tau) * mag;
        }
    }

    /// Decay to silence, as an analyser fed with zeros would.
    pub fn analyse_silence(&mut self) {
        self.block.fill(0.0);
        let tau = self.smoothing;
        self.magnitudes.iter_mut().for_each(|m| *m *= tau);
    }

    pub fn byte_frequency_data(&self, out: &mut [u8]) {
        let range = self.max_db - self.min_db;
        for (o, m) in out.iter_mut().zip(&self.magnitudes) {
            let db = if *m > 0.0 { 20.0 * m.log10() } else { f32::NEG_INFINITY };
            let scaled = 255.0 / range * (db - self.min_db);
            *o = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    pub fn byte_time_domain_data(&self, out: &mut [u8]) {
        let start = self.block.len().saturating_sub(out.len());
        for (o, s) in out.iter_mut().zip(&self.block[start..]) {
            *o = (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8;
        }
    }
}
