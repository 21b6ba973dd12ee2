//! Short-time magnitude spectra for the reference tone tracer.

pub mod stft;

pub use stft::Stft;

use serde::{Deserialize, Serialize};

/// Analysis window applied to every STFT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl WindowKind {
    /// Periodic window of length `n`.
    pub fn build(self, n: usize) -> Vec<f32> {
        use std::f64::consts::PI;
        (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / n as f64;
                let w = match self {
                    WindowKind::Rectangular => 1.0,
                    WindowKind::Hann => 0.5 * (1.0 - x.cos()),
                    WindowKind::Hamming => 0.54 - 0.46 * x.cos(),
                    WindowKind::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                };
                w as f32
            })
            .collect()
    }
}

/// Magnitude spectra of one block, one frame per STFT hop.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    /// `fft_size / 2 + 1` magnitudes per frame.
    pub frames: Vec<Vec<f32>>,
    pub fft_size: usize,
    pub hop: usize,
    pub sample_rate: u32,
    /// Centered frames sit on sample `j * hop`; uncentered frames cover
    /// `[j * hop, j * hop + fft_size)`.
    pub centered: bool,
}

impl Spectrogram {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bins per frame.
    pub fn bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Width of one frequency bin in Hz.
    pub fn bin_hz(&self) -> f64 {
        self.sample_rate as f64 / self.fft_size as f64
    }

    /// Block-relative time of frame `j` in seconds (frame centre).
    pub fn frame_time(&self, j: usize) -> f64 {
        let centre = if self.centered {
            j * self.hop
        } else {
            j * self.hop + self.fft_size / 2
        };
        centre as f64 / self.sample_rate as f64
    }

    /// First frame whose time is at or after `t`.
    pub fn frame_at_or_after(&self, t: f64) -> usize {
        let offset = if self.centered { 0 } else { self.fft_size / 2 } as f64;
        let exact = (t * self.sample_rate as f64 - offset) / self.hop as f64;
        // tolerate float noise on grid-aligned start times
        let j = (exact - 1e-6).ceil();
        if j <= 0.0 {
            0
        } else {
            j as usize
        }
    }

    /// Last frame whose time is at or before `t`, if any.
    pub fn frame_at_or_before(&self, t: f64) -> Option<usize> {
        let offset = if self.centered { 0 } else { self.fft_size / 2 } as f64;
        let exact = (t * self.sample_rate as f64 - offset) / self.hop as f64;
        let j = (exact + 1e-6).floor();
        if j < 0.0 || self.frames.is_empty() {
            None
        } else {
            Some((j as usize).min(self.frames.len() - 1))
        }
    }
}
