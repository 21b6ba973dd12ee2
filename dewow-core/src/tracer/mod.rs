//! Reference tone tracing.
//!
//! `PeakTracer` follows the reference tone through one block's spectrogram.
//! The tracking heuristic (`TraceMode`) and the search-window prediction
//! (`Adaptation`) are closed enums resolved into a concrete tracer before the
//! block loop starts; the per-frame loop matches on them directly.

pub mod strategy;

use serde::{Deserialize, Serialize};

use crate::analysis::Spectrogram;
use crate::error::{DewowError, Result};
use strategy::{BinWindow, History, Previous};

/// Per-frame frequency estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    /// Magnitude-weighted mean frequency of the search window.
    #[default]
    CenterOfGravity,
    /// Strongest bin, refined by parabolic interpolation on log magnitude.
    Peak,
    /// Cross-correlation shift against the previous frame's spectrum.
    Correlation,
}

/// How the next frame's expected frequency is predicted from history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Adaptation {
    /// Mean of the last `AVERAGE_SPAN` estimates.
    #[default]
    Average,
    /// Linear extrapolation from the last two estimates.
    Linear,
    /// Last estimate.
    Constant,
    /// First estimate; the window never moves.
    None,
}

/// Frequency search band in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBand {
    pub low: f64,
    pub high: f64,
}

impl SearchBand {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        if !(low.is_finite() && high.is_finite()) || low <= 0.0 || high <= low {
            return Err(DewowError::InvalidConfig(format!(
                "search band must satisfy 0 < low < high, got [{low}, {high}]"
            )));
        }
        Ok(Self { low, high })
    }

    pub fn clamp(&self, f: f64) -> f64 {
        f.clamp(self.low, self.high)
    }
}

/// Tracer output for one block: parallel, equal-length sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    /// Block-relative frame times in seconds.
    pub times: Vec<f64>,
    /// Estimated reference frequency in Hz; `NaN` marks a dropout.
    pub frequencies: Vec<f64>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn dropouts(&self) -> usize {
        self.frequencies.iter().filter(|f| f.is_nan()).count()
    }
}

#[derive(Debug, Clone)]
pub struct PeakTracer {
    mode: TraceMode,
    adaptation: Adaptation,
    band: SearchBand,
    /// Half-width of the search window in semitones.
    tolerance: f64,
    magnitude_floor: f32,
}

impl PeakTracer {
    pub const DEFAULT_MAGNITUDE_FLOOR: f32 = 1e-6;

    pub fn new(mode: TraceMode, adaptation: Adaptation, band: SearchBand, tolerance: f64) -> Self {
        Self {
            mode,
            adaptation,
            band,
            tolerance: tolerance.max(0.0),
            magnitude_floor: Self::DEFAULT_MAGNITUDE_FLOOR,
        }
    }

    pub fn with_magnitude_floor(mut self, floor: f32) -> Self {
        self.magnitude_floor = floor;
        self
    }

    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Trace frames from the first at/after `start` through the last
    /// at/before `end` (block-relative seconds).
    pub fn trace(&self, spec: &Spectrogram, start: Option<f64>, end: Option<f64>) -> Trace {
        if spec.is_empty() {
            return Trace::default();
        }
        let first = start.map_or(0, |t| spec.frame_at_or_after(t));
        let last = match end {
            Some(t) => match spec.frame_at_or_before(t) {
                Some(j) => j,
                None => return Trace::default(),
            },
            None => spec.len() - 1,
        };
        if first > last {
            return Trace::default();
        }

        let bin_hz = spec.bin_hz();
        let band_bins = BinWindow::from_hz(self.band.low, self.band.high, bin_hz, spec.bins());
        let ratio = 2f64.powf(self.tolerance / 12.0);

        let mut history = History::default();
        let mut previous: Option<Previous> = None;
        let mut trace = Trace {
            times: Vec::with_capacity(last - first + 1),
            frequencies: Vec::with_capacity(last - first + 1),
        };

        for j in first..=last {
            let frame = &spec.frames[j];
            let window = match history.predict(self.adaptation) {
                Some(p) => {
                    let p = self.band.clamp(p);
                    BinWindow::from_hz(p / ratio, p * ratio, bin_hz, spec.bins())
                        .intersect(&band_bins)
                }
                None => band_bins,
            };

            let estimate = if window.peak_magnitude(frame) < self.magnitude_floor {
                None
            } else {
                match self.mode {
                    TraceMode::CenterOfGravity => strategy::center_of_gravity(frame, window, bin_hz),
                    TraceMode::Peak => strategy::parabolic_peak(frame, window, bin_hz),
                    TraceMode::Correlation => match &previous {
                        Some(prev) => {
                            strategy::correlation_shift(frame, prev, band_bins, window, bin_hz)
                        }
                        None => strategy::parabolic_peak(frame, window, bin_hz),
                    },
                }
                .map(|f| self.band.clamp(f))
            };

            trace.times.push(spec.frame_time(j));
            match estimate {
                Some(f) => {
                    history.push(f);
                    if self.mode == TraceMode::Correlation {
                        previous = Some(Previous::capture(frame, band_bins, f));
                    }
                    trace.frequencies.push(f);
                }
                None => {
                    previous = None;
                    trace.frequencies.push(f64::NAN);
                }
            }
        }

        trace
    }
}
