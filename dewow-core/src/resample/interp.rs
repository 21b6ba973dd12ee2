//! Waveform interpolation at fractional input positions.
//!
//! Positions outside `[0, len - 1]` read the nearest edge sample.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{DewowError, Result};

/// Interpolation policy of the resample stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    /// Blackman-windowed sinc; `quality` input samples contribute to each
    /// output sample.
    Sinc { quality: u32 },
}

impl Interpolation {
    pub const DEFAULT_SINC_QUALITY: u32 = 50;
    pub const MAX_SINC_QUALITY: u32 = 100;

    pub fn validate(&self) -> Result<()> {
        match *self {
            Interpolation::Linear => Ok(()),
            Interpolation::Sinc { quality } if (1..=Self::MAX_SINC_QUALITY).contains(&quality) => {
                Ok(())
            }
            Interpolation::Sinc { quality } => Err(DewowError::InvalidConfig(format!(
                "sinc quality must be in 1..={}, got {quality}",
                Self::MAX_SINC_QUALITY
            ))),
        }
    }
}

pub fn linear(samples: &[f32], x: f64) -> f32 {
    let Some(last) = samples.len().checked_sub(1) else {
        return 0.0;
    };
    if x <= 0.0 {
        return samples[0];
    }
    if x >= last as f64 {
        return samples[last];
    }
    let i = x.floor() as usize;
    let frac = (x - i as f64) as f32;
    samples[i] + (samples[i + 1] - samples[i]) * frac
}

/// Windowed-sinc kernel whose cutoff follows the local read step.
#[derive(Debug, Clone, Copy)]
pub struct SincKernel {
    half_width: usize,
}

impl SincKernel {
    pub fn new(quality: u32) -> Self {
        Self {
            half_width: (quality as usize).div_ceil(2).max(1),
        }
    }

    pub fn half_width(&self) -> usize {
        self.half_width
    }

    /// Value at `x`, reading `step` input samples per output sample.
    ///
    /// Steps above 1 lower the cutoff to `1 / step` and widen the kernel to
    /// match, which keeps the output free of aliasing when reading fast.
    pub fn eval(&self, samples: &[f32], x: f64, step: f64) -> f32 {
        let Some(last) = samples.len().checked_sub(1) else {
            return 0.0;
        };
        let x = x.clamp(0.0, last as f64);
        let cutoff = if step > 1.0 { 1.0 / step } else { 1.0 };
        let radius = self.half_width as f64 / cutoff;

        let lo = (x - radius).floor() as isize + 1;
        let hi = (x + radius).ceil() as isize - 1;
        let mut acc = 0.0f64;
        let mut norm = 0.0f64;
        for i in lo..=hi {
            let d = x - i as f64;
            let u = d / radius;
            if u.abs() >= 1.0 {
                continue;
            }
            let w = cutoff * sinc(cutoff * d) * blackman(u);
            let idx = i.clamp(0, last as isize) as usize;
            acc += w * samples[idx] as f64;
            norm += w;
        }
        if norm.abs() < 1e-12 {
            return linear(samples, x);
        }
        (acc / norm) as f32
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Blackman window over `u` in `(-1, 1)`.
fn blackman(u: f64) -> f64 {
    0.42 + 0.5 * (PI * u).cos() + 0.08 * (2.0 * PI * u).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn linear_interpolates_and_clamps() {
        let s = [0.0, 1.0, 3.0];
        assert_abs_diff_eq!(linear(&s, 0.5), 0.5);
        assert_abs_diff_eq!(linear(&s, 1.25), 1.5);
        assert_eq!(linear(&s, -2.0), 0.0);
        assert_eq!(linear(&s, 9.0), 3.0);
        assert_eq!(linear(&[], 1.0), 0.0);
    }

    #[test]
    fn sinc_reproduces_samples_on_the_grid() {
        let s: Vec<f32> = (0..64).map(|i| ((i * 7) % 11) as f32 - 5.0).collect();
        let k = SincKernel::new(50);
        for i in 0..64 {
            assert_abs_diff_eq!(k.eval(&s, i as f64, 1.0), s[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn sinc_tracks_a_smooth_signal_between_samples() {
        let s: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();
        let k = SincKernel::new(32);
        let x = 100.37;
        assert_abs_diff_eq!(k.eval(&s, x, 1.0), (x as f32 * 0.05).sin(), epsilon = 1e-3);
    }

    #[test]
    fn sinc_low_passes_when_reading_fast() {
        // alternating signal at nyquist vanishes when reading two samples per output
        let s: Vec<f32> = (0..128).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let k = SincKernel::new(32);
        assert!(k.eval(&s, 64.0, 2.0).abs() < 0.05);
    }

    #[test]
    fn quality_is_validated() {
        assert!(Interpolation::Sinc { quality: 0 }.validate().is_err());
        assert!(Interpolation::Sinc { quality: 101 }.validate().is_err());
        assert!(Interpolation::Sinc { quality: 1 }.validate().is_ok());
        assert_eq!(SincKernel::new(1).half_width(), 1);
        assert_eq!(SincKernel::new(50).half_width(), 25);
    }

    #[test]
    fn interpolation_serializes_as_tagged_variants() {
        let json = serde_json::to_value(Interpolation::Sinc { quality: 20 }).unwrap();
        assert_eq!(json["sinc"]["quality"], 20);
        let linear: Interpolation = serde_json::from_str(r#""linear""#).unwrap();
        assert_eq!(linear, Interpolation::Linear);
    }
}
