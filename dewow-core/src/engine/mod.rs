//! Run configuration and the stage drivers built from it.
//!
//! ## Stages
//!
//! ```text
//! EngineConfig ──curve_assembler()──► CurveAssembler  (pipeline::trace_source)
//!              ──resample_engine()──► ResampleEngine  (pipeline::resample_source)
//! ```
//!
//! `nominal_frequency` has no default: every run states the reference tone
//! it expects.

pub mod pipeline;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::WindowKind,
    buffering::BlockFraming,
    curve::CurveAssembler,
    error::{DewowError, Result},
    resample::{Interpolation, ResampleEngine},
    tracer::{Adaptation, PeakTracer, SearchBand, TraceMode},
};

/// Configuration for both pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Expected steady-state reference tone frequency (Hz).
    pub nominal_frequency: f64,
    /// Block layout shared by both stages.
    #[serde(default)]
    pub framing: BlockFraming,
    #[serde(default)]
    pub trace: TraceConfig,
    #[serde(default)]
    pub resample: ResampleConfig,
}

/// Trace stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct TraceConfig {
    /// STFT size in samples. Default: 512.
    pub fft_size: usize,
    /// STFT window. Default: Hann.
    pub window: WindowKind,
    /// Lower edge of the search band (Hz). Default: 900.
    pub band_low: f64,
    /// Upper edge of the search band (Hz). Default: 1100.
    pub band_high: f64,
    /// Search window half-width around the prediction, in semitones.
    /// Default: 1.0.
    pub tolerance: f64,
    /// Default: Average.
    pub adaptation: Adaptation,
    /// Default: CenterOfGravity.
    pub mode: TraceMode,
    /// Where a clean reference tone begins (seconds). Default: 0.
    pub start_time: f64,
    /// Peak magnitude below which a frame counts as a dropout.
    /// Default: 1e-6.
    pub magnitude_floor: f32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            fft_size: 512,
            window: WindowKind::Hann,
            band_low: 900.0,
            band_high: 1_100.0,
            tolerance: 1.0,
            adaptation: Adaptation::Average,
            mode: TraceMode::CenterOfGravity,
            start_time: 0.0,
            magnitude_floor: PeakTracer::DEFAULT_MAGNITUDE_FLOOR,
        }
    }
}

/// Resample stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ResampleConfig {
    /// Default: Linear.
    pub interpolation: Interpolation,
    /// Positions buffered before a chunk is flushed. Default: 400000.
    pub chunk_threshold: usize,
    /// Smallest accepted speed ratio. Default: 0.5.
    pub min_speed_ratio: f64,
    /// Largest accepted speed ratio. Default: 2.0.
    pub max_speed_ratio: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Linear,
            chunk_threshold: ResampleEngine::DEFAULT_CHUNK_THRESHOLD,
            min_speed_ratio: ResampleEngine::DEFAULT_MIN_RATIO,
            max_speed_ratio: ResampleEngine::DEFAULT_MAX_RATIO,
        }
    }
}

impl EngineConfig {
    pub fn new(nominal_frequency: f64) -> Self {
        Self {
            nominal_frequency,
            framing: BlockFraming::default(),
            trace: TraceConfig::default(),
            resample: ResampleConfig::default(),
        }
    }

    /// Check every setting that does not depend on the source.
    pub fn validate(&self) -> Result<()> {
        if !self.nominal_frequency.is_finite() || self.nominal_frequency <= 0.0 {
            return Err(DewowError::InvalidConfig(format!(
                "nominal frequency must be positive, got {}",
                self.nominal_frequency
            )));
        }
        self.framing.validate()?;

        let t = &self.trace;
        if t.fft_size < 2 {
            return Err(DewowError::InvalidConfig(format!(
                "FFT size must be >= 2, got {}",
                t.fft_size
            )));
        }
        if t.fft_size > self.framing.block_len() {
            return Err(DewowError::InvalidConfig(format!(
                "FFT size ({}) exceeds the block length ({})",
                t.fft_size,
                self.framing.block_len()
            )));
        }
        SearchBand::new(t.band_low, t.band_high)?;
        if !t.tolerance.is_finite() || t.tolerance < 0.0 {
            return Err(DewowError::InvalidConfig(format!(
                "tolerance must be >= 0 semitones, got {}",
                t.tolerance
            )));
        }
        if !t.start_time.is_finite() || t.start_time < 0.0 {
            return Err(DewowError::InvalidConfig(format!(
                "start time must be >= 0 s, got {}",
                t.start_time
            )));
        }
        if !t.magnitude_floor.is_finite() || t.magnitude_floor < 0.0 {
            return Err(DewowError::InvalidConfig(
                "magnitude floor must be >= 0".into(),
            ));
        }

        let r = &self.resample;
        r.interpolation.validate()?;
        if r.chunk_threshold == 0 {
            return Err(DewowError::InvalidConfig(
                "chunk threshold must be > 0".into(),
            ));
        }
        let limits_ok = r.min_speed_ratio.is_finite()
            && r.max_speed_ratio.is_finite()
            && r.min_speed_ratio > 0.0
            && r.min_speed_ratio <= 1.0
            && r.max_speed_ratio >= 1.0;
        if !limits_ok {
            return Err(DewowError::InvalidConfig(format!(
                "speed ratio limits must satisfy 0 < min <= 1 <= max, got [{}, {}]",
                r.min_speed_ratio, r.max_speed_ratio
            )));
        }
        Ok(())
    }

    /// `validate` plus the checks that need the source's sample rate.
    pub fn validate_for(&self, sample_rate: u32) -> Result<()> {
        self.validate()?;
        if sample_rate == 0 {
            return Err(DewowError::InvalidConfig("sample rate must be > 0".into()));
        }
        let nyquist = sample_rate as f64 / 2.0;
        if self.trace.band_high > nyquist {
            return Err(DewowError::InvalidConfig(format!(
                "search band upper edge ({} Hz) is above Nyquist ({nyquist} Hz)",
                self.trace.band_high
            )));
        }
        Ok(())
    }

    pub fn tracer(&self) -> Result<PeakTracer> {
        let band = SearchBand::new(self.trace.band_low, self.trace.band_high)?;
        Ok(
            PeakTracer::new(self.trace.mode, self.trace.adaptation, band, self.trace.tolerance)
                .with_magnitude_floor(self.trace.magnitude_floor),
        )
    }

    pub fn curve_assembler(&self) -> Result<CurveAssembler> {
        CurveAssembler::new(
            self.framing,
            self.trace.fft_size,
            self.trace.window,
            self.tracer()?,
            self.trace.start_time,
        )
    }

    pub fn resample_engine(&self, sample_rate: u32) -> Result<ResampleEngine> {
        Ok(
            ResampleEngine::new(sample_rate, self.nominal_frequency, self.resample.interpolation)?
                .with_chunk_threshold(self.resample.chunk_threshold)
                .with_ratio_limits(self.resample.min_speed_ratio, self.resample.max_speed_ratio),
        )
    }

    /// First sample of block 0 that belongs to the corrected output.
    pub fn first_sample(&self, sample_rate: u32) -> usize {
        (self.trace.start_time * sample_rate as f64).round() as usize
    }
}
