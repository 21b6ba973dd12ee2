//! Windowed STFT magnitudes using `rustfft`.
//!
//! Uncentered analysis uses the classic grid: a block of `L` samples yields
//! `floor((L - F) / H) + 1` frames. Centered analysis zero-pads `F / 2` on
//! both sides and yields one frame per hop start inside the block,
//! `ceil(L / H)` frames; the trace stage uses this layout so frame `j` lines
//! up with sample `j * H`.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::{Spectrogram, WindowKind};
use crate::error::{DewowError, Result};

pub struct Stft {
    fft_size: usize,
    hop: usize,
    window: Vec<f32>,
    /// Magnitude scale so a full-scale sine peaks near 1.0.
    scale: f32,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    /// # Errors
    /// Returns `DewowError::InvalidConfig` for `fft_size < 2` or `hop == 0`.
    pub fn new(fft_size: usize, hop: usize, window: WindowKind) -> Result<Self> {
        if fft_size < 2 {
            return Err(DewowError::InvalidConfig(format!(
                "FFT size must be >= 2, got {fft_size}"
            )));
        }
        if hop == 0 {
            return Err(DewowError::InvalidConfig("STFT hop must be > 0".into()));
        }
        let window = window.build(fft_size);
        let window_sum: f32 = window.iter().sum();
        let scale = if window_sum > 0.0 {
            2.0 / window_sum
        } else {
            1.0
        };
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Ok(Self {
            fft_size,
            hop,
            window,
            scale,
            fft,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of frames `magnitudes` returns for `len` samples.
    pub fn frame_count(&self, len: usize, centered: bool) -> usize {
        if centered {
            len.div_ceil(self.hop)
        } else if len < self.fft_size {
            0
        } else {
            (len - self.fft_size) / self.hop + 1
        }
    }

    pub fn magnitudes(&self, samples: &[f32], sample_rate: u32, centered: bool) -> Spectrogram {
        let n_frames = self.frame_count(samples.len(), centered);
        let pad = if centered { self.fft_size / 2 } else { 0 };
        let bins = self.fft_size / 2 + 1;

        let mut frames = Vec::with_capacity(n_frames);
        let mut buf = vec![Complex::new(0.0f32, 0.0); self.fft_size];

        for j in 0..n_frames {
            // index into the virtually padded signal
            let origin = (j * self.hop) as isize - pad as isize;
            for (i, v) in buf.iter_mut().enumerate() {
                let idx = origin + i as isize;
                let s = if idx >= 0 && (idx as usize) < samples.len() {
                    samples[idx as usize]
                } else {
                    0.0
                };
                *v = Complex::new(s * self.window[i], 0.0);
            }
            self.fft.process(&mut buf);
            frames.push(buf[..bins].iter().map(|c| c.norm() * self.scale).collect());
        }

        Spectrogram {
            frames,
            fft_size: self.fft_size,
            hop: self.hop,
            sample_rate,
            centered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sr as f64).sin() as f32)
            .collect()
    }

    #[test]
    fn classic_grid_frame_count() {
        let stft = Stft::new(256, 64, WindowKind::Hann).unwrap();
        let spec = stft.magnitudes(&vec![0.0; 1_000], 8_000, false);
        assert_eq!(spec.len(), (1_000 - 256) / 64 + 1);
        assert_eq!(stft.frame_count(100, false), 0);
    }

    #[test]
    fn centered_grid_has_one_frame_per_hop() {
        let stft = Stft::new(256, 64, WindowKind::Hann).unwrap();
        assert_eq!(stft.frame_count(1_000, true), 16);
        assert_eq!(stft.frame_count(1_024, true), 16);
        let spec = stft.magnitudes(&vec![0.0; 1_024], 8_000, true);
        assert_eq!(spec.len(), 16);
        assert_eq!(spec.frames[0].len(), 129);
    }

    #[test]
    fn sine_peaks_at_its_bin_with_unit_scale() {
        let sr = 8_000;
        // 1000 Hz is exactly bin 32 for a 256-point FFT at 8 kHz
        let stft = Stft::new(256, 64, WindowKind::Hann).unwrap();
        let spec = stft.magnitudes(&tone(1_000.0, sr, 2_048), sr, false);
        for frame in &spec.frames {
            let (peak, mag) = frame
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .unwrap();
            assert_eq!(peak, 32);
            assert!((mag - 1.0).abs() < 0.02, "mag={mag}");
        }
    }

    #[test]
    fn rejects_degenerate_sizes() {
        assert!(Stft::new(1, 4, WindowKind::Hann).is_err());
        assert!(Stft::new(64, 0, WindowKind::Hann).is_err());
    }
}
