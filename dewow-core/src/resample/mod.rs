//! Resample stage: variable-rate interpolation along a speed curve.
//!
//! ## Per block
//!
//! ```text
//! curve ──sanitise──► speeds[k] = f[k] / nominal
//!                     periods[k] = (t[k+1] - t[k]) · sr
//!
//! per segment k:  n = round(periods[k] · mean(speeds[k], speeds[k+1]) + err)
//!                 err = ideal − n
//!                 n speeds linspaced s[k] → s[k+1], positions = Σ 1/speed
//!
//! chunks:         (base_offset, positions) ──interpolate──► sink
//! ```
//!
//! Positions are an exclusive running sum, so the first output sample of a
//! block reads the input exactly at the curve's first point and a unit-speed
//! curve reproduces the input sample for sample.
//!
//! `err` lives in [`CarryState`] and is threaded through every segment of
//! every block of one channel; `offset` is re-anchored at each block's first
//! curve point.

pub mod interp;

pub use interp::{Interpolation, SincKernel};

use tracing::debug;

use crate::audio::SampleSink;
use crate::curve::{SpeedCurve, SpeedPoint};
use crate::error::{DewowError, Result};

/// Accumulators that must survive across segments, chunks and blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CarryState {
    /// Rounding residue of the output sample count, in samples.
    pub err: f64,
    /// Input position (block samples) that the current chunk starts at.
    pub offset: f64,
}

/// A bounded run of output positions, relative to `base_offset`.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionChunk {
    pub base_offset: f64,
    pub positions: Vec<f64>,
}

/// An ordered curve with at least two points and no dropouts.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCurve(SpeedCurve);

impl PreparedCurve {
    pub fn points(&self) -> &[SpeedPoint] {
        self.0.points()
    }
}

/// What happened to one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Resampled { output_frames: usize, chunks: usize },
    /// No usable curve; the input was copied unchanged.
    PassedThrough { frames: usize },
}

impl BlockOutcome {
    pub fn output_frames(&self) -> usize {
        match *self {
            BlockOutcome::Resampled { output_frames, .. } => output_frames,
            BlockOutcome::PassedThrough { frames } => frames,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, BlockOutcome::PassedThrough { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ResampleEngine {
    sample_rate: u32,
    nominal_frequency: f64,
    interpolation: Interpolation,
    sinc: Option<SincKernel>,
    chunk_threshold: usize,
    min_ratio: f64,
    max_ratio: f64,
}

impl ResampleEngine {
    pub const DEFAULT_CHUNK_THRESHOLD: usize = 400_000;
    pub const DEFAULT_MIN_RATIO: f64 = 0.5;
    pub const DEFAULT_MAX_RATIO: f64 = 2.0;

    /// # Errors
    /// `DewowError::InvalidConfig` for a zero sample rate, a non-positive
    /// nominal frequency or an out-of-range sinc quality.
    pub fn new(
        sample_rate: u32,
        nominal_frequency: f64,
        interpolation: Interpolation,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DewowError::InvalidConfig("sample rate must be > 0".into()));
        }
        if !nominal_frequency.is_finite() || nominal_frequency <= 0.0 {
            return Err(DewowError::InvalidConfig(format!(
                "nominal frequency must be positive, got {nominal_frequency}"
            )));
        }
        interpolation.validate()?;
        let sinc = match interpolation {
            Interpolation::Sinc { quality } => Some(SincKernel::new(quality)),
            Interpolation::Linear => None,
        };
        Ok(Self {
            sample_rate,
            nominal_frequency,
            interpolation,
            sinc,
            chunk_threshold: Self::DEFAULT_CHUNK_THRESHOLD,
            min_ratio: Self::DEFAULT_MIN_RATIO,
            max_ratio: Self::DEFAULT_MAX_RATIO,
        })
    }

    /// Flush position chunks once they hold more than `threshold` positions.
    pub fn with_chunk_threshold(mut self, threshold: usize) -> Self {
        self.chunk_threshold = threshold.max(1);
        self
    }

    /// Accepted speed ratio range; ratios outside it are rejected.
    pub fn with_ratio_limits(mut self, min: f64, max: f64) -> Self {
        self.min_ratio = min;
        self.max_ratio = max;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// The curve to integrate, with dropouts filled, or `None` when fewer
    /// than two valid points remain.
    ///
    /// # Errors
    /// `DewowError::UnorderedCurve` when times do not strictly increase.
    pub fn prepare(&self, block: usize, curve: &SpeedCurve) -> Result<Option<PreparedCurve>> {
        if let Some(point) = curve.first_unordered() {
            return Err(DewowError::UnorderedCurve { block, point });
        }
        if curve.valid_count() < 2 {
            return Ok(None);
        }
        Ok(Some(PreparedCurve(curve.with_gaps_filled())))
    }

    /// Speed ratio per point.
    ///
    /// # Errors
    /// `DewowError::InvalidSpeedRatio` for a ratio that is not finite, not
    /// positive, or outside the configured limits.
    pub fn speeds(&self, block: usize, points: &[SpeedPoint]) -> Result<Vec<f64>> {
        points
            .iter()
            .enumerate()
            .map(|(point, p)| {
                let ratio = p.ratio(self.nominal_frequency);
                if !ratio.is_finite()
                    || ratio <= 0.0
                    || ratio < self.min_ratio
                    || ratio > self.max_ratio
                {
                    Err(DewowError::InvalidSpeedRatio {
                        block,
                        point,
                        ratio,
                    })
                } else {
                    Ok(ratio)
                }
            })
            .collect()
    }

    /// Integrate `curve` into output positions.
    ///
    /// Anchors `carry.offset` at the first point and updates `carry.err`.
    pub fn output_positions(
        &self,
        block: usize,
        curve: &PreparedCurve,
        carry: &mut CarryState,
    ) -> Result<Vec<PositionChunk>> {
        let points = curve.points();
        let speeds = self.speeds(block, points)?;
        let sr = self.sample_rate as f64;

        carry.offset = (points[0].time * sr).round();
        let mut chunks = Vec::new();
        let mut buffer: Vec<f64> = Vec::new();
        let mut temp_offset = 0.0f64;

        for k in 0..speeds.len() - 1 {
            if buffer.len() > self.chunk_threshold {
                debug!(block, positions = buffer.len(), "flushing position chunk");
                chunks.push(PositionChunk {
                    base_offset: carry.offset,
                    positions: std::mem::take(&mut buffer),
                });
                carry.offset += temp_offset;
                temp_offset = 0.0;
            }

            let period = (points[k + 1].time - points[k].time) * sr;
            let (s0, s1) = (speeds[k], speeds[k + 1]);
            let ideal = period * (s0 + s1) / 2.0 + carry.err;
            let n = ideal.round().max(0.0);
            carry.err = ideal - n;
            let n = n as usize;

            let mut advance = 0.0f64;
            for i in 0..n {
                let speed = if n == 1 {
                    s0
                } else {
                    s0 + (s1 - s0) * i as f64 / (n - 1) as f64
                };
                buffer.push(temp_offset + advance);
                advance += 1.0 / speed;
            }
            temp_offset += advance;
        }

        if !buffer.is_empty() {
            chunks.push(PositionChunk {
                base_offset: carry.offset,
                positions: buffer,
            });
            carry.offset += temp_offset;
        }
        Ok(chunks)
    }

    /// Interpolate `samples` at every chunk position and write the result.
    ///
    /// Returns the number of samples written.
    pub fn render(
        &self,
        samples: &[f32],
        chunks: &[PositionChunk],
        sink: &mut dyn SampleSink,
    ) -> Result<usize> {
        let mut written = 0;
        for chunk in chunks {
            let out = self.interpolate(samples, chunk);
            sink.write_samples(&out)?;
            written += out.len();
        }
        Ok(written)
    }

    fn interpolate(&self, samples: &[f32], chunk: &PositionChunk) -> Vec<f32> {
        let base = chunk.base_offset;
        let positions = &chunk.positions;
        match &self.sinc {
            None => positions
                .iter()
                .map(|p| interp::linear(samples, base + p))
                .collect(),
            Some(kernel) => positions
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let step = match (positions.get(i + 1), i.checked_sub(1)) {
                        (Some(next), _) => next - p,
                        (None, Some(prev)) => p - positions[prev],
                        (None, None) => 1.0,
                    };
                    kernel.eval(samples, base + p, step)
                })
                .collect(),
        }
    }

    /// Resample one block, or copy it unchanged when its curve is unusable.
    pub fn resample_block(
        &self,
        block: usize,
        samples: &[f32],
        curve: &SpeedCurve,
        carry: &mut CarryState,
        sink: &mut dyn SampleSink,
    ) -> Result<BlockOutcome> {
        match self.prepare(block, curve)? {
            Some(prepared) => self.resample_prepared(block, samples, &prepared, carry, sink),
            None => {
                sink.write_samples(samples)?;
                Ok(BlockOutcome::PassedThrough {
                    frames: samples.len(),
                })
            }
        }
    }

    /// Resample one block along a curve already returned by [`prepare`].
    ///
    /// [`prepare`]: ResampleEngine::prepare
    pub fn resample_prepared(
        &self,
        block: usize,
        samples: &[f32],
        curve: &PreparedCurve,
        carry: &mut CarryState,
        sink: &mut dyn SampleSink,
    ) -> Result<BlockOutcome> {
        let chunks = self.output_positions(block, curve, carry)?;
        let output_frames = self.render(samples, &chunks, sink)?;
        debug!(block, output_frames, chunks = chunks.len(), "resampled block");
        Ok(BlockOutcome::Resampled {
            output_frames,
            chunks: chunks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SR: u32 = 48_000;

    fn curve(points: &[(f64, f64)]) -> SpeedCurve {
        SpeedCurve::new(points.iter().map(|&(t, f)| SpeedPoint::new(t, f)).collect())
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * 1_000.0 * i as f64 / SR as f64).sin() as f32)
            .collect()
    }

    fn engine() -> ResampleEngine {
        ResampleEngine::new(SR, 1_000.0, Interpolation::Linear).unwrap()
    }

    fn prepared(e: &ResampleEngine, c: &SpeedCurve) -> PreparedCurve {
        e.prepare(0, c).unwrap().unwrap()
    }

    #[test]
    fn rising_speed_segment_yields_expected_length() {
        let mut out = Vec::new();
        let outcome = engine()
            .resample_block(
                0,
                &tone(48_000),
                &curve(&[(0.0, 1_000.0), (1.0, 1_100.0)]),
                &mut CarryState::default(),
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 50_400);
        assert_eq!(outcome.output_frames(), 50_400);
        assert!(!outcome.is_passthrough());
    }

    #[test]
    fn unit_speed_reproduces_input() {
        let input = tone(4_800);
        let unit = curve(&[(0.0, 1_000.0), (0.05, 1_000.0), (0.1, 1_000.0)]);
        let mut out = Vec::new();
        engine()
            .resample_block(0, &input, &unit, &mut CarryState::default(), &mut out)
            .unwrap();
        assert!((out.len() as i64 - input.len() as i64).abs() <= 1);
        for (a, b) in out.iter().zip(&input) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn resampling_twice_with_unit_curve_is_stable() {
        let input = tone(4_800);
        let unit = curve(&[(0.0, 1_000.0), (0.1, 1_000.0)]);
        let e = engine();
        let mut once = Vec::new();
        e.resample_block(0, &input, &unit, &mut CarryState::default(), &mut once)
            .unwrap();
        let mut twice = Vec::new();
        e.resample_block(0, &once, &unit, &mut CarryState::default(), &mut twice)
            .unwrap();
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(&twice) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn rounding_carry_stays_within_half_a_sample() {
        let e = engine();
        // irregular speeds and non-integer periods
        let points: Vec<(f64, f64)> = (0..200)
            .map(|k| {
                let t = k as f64 * 0.000_687_3;
                (t, 1_000.0 + 37.0 * (k as f64 * 0.31).sin())
            })
            .collect();
        let c = curve(&points);
        let mut carry = CarryState::default();
        let mut ideal = 0.0;
        let mut actual = 0usize;
        for k in 0..points.len() - 1 {
            let segment = curve(&points[k..k + 2]);
            let chunks = e.output_positions(0, &prepared(&e, &segment), &mut carry).unwrap();
            actual += chunks.iter().map(|c| c.positions.len()).sum::<usize>();
            let period = (points[k + 1].0 - points[k].0) * SR as f64;
            ideal += period * (points[k].1 + points[k + 1].1) / 2_000.0;
            assert!((actual as f64 - ideal).abs() <= 0.5 + 1e-9, "segment {k}");
        }

        let mut whole_carry = CarryState::default();
        let whole: usize = e
            .output_positions(0, &prepared(&e, &c), &mut whole_carry)
            .unwrap()
            .iter()
            .map(|c| c.positions.len())
            .sum();
        assert_eq!(whole, actual);
    }

    #[test]
    fn zero_speed_is_rejected() {
        let mut out = Vec::new();
        let err = engine()
            .resample_block(
                3,
                &tone(4_800),
                &curve(&[(0.0, 0.0), (0.1, 0.0)]),
                &mut CarryState::default(),
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(err, DewowError::InvalidSpeedRatio { block: 3, point: 0, .. }));
        assert!(out.is_empty());
    }

    #[test]
    fn ratio_limits_reject_implausible_speeds() {
        let e = engine().with_ratio_limits(0.9, 1.1);
        let err = e
            .speeds(1, &[SpeedPoint::new(0.0, 1_000.0), SpeedPoint::new(1.0, 1_200.0)])
            .unwrap_err();
        assert!(matches!(err, DewowError::InvalidSpeedRatio { block: 1, point: 1, .. }));
        assert!(e.speeds(1, &[SpeedPoint::new(0.0, -5.0)]).is_err());
    }

    #[test]
    fn prepared_curve_has_its_dropouts_filled() {
        let e = engine();
        let gappy = curve(&[(0.0, 1_000.0), (0.05, f64::NAN), (0.1, 1_020.0)]);
        let c = prepared(&e, &gappy);
        assert_abs_diff_eq!(c.points()[1].frequency, 1_010.0, epsilon = 1e-9);

        let input = tone(4_800);
        let mut direct = Vec::new();
        e.resample_prepared(0, &input, &c, &mut CarryState::default(), &mut direct)
            .unwrap();
        let mut via_block = Vec::new();
        e.resample_block(0, &input, &gappy, &mut CarryState::default(), &mut via_block)
            .unwrap();
        assert_eq!(direct, via_block);
        assert!(e.prepare(0, &curve(&[(0.0, f64::NAN), (0.1, 1_000.0)])).unwrap().is_none());
    }

    #[test]
    fn dropouts_are_interpolated_not_propagated() {
        let gappy = curve(&[(0.0, 1_000.0), (0.05, f64::NAN), (0.1, 1_000.0)]);
        let mut out = Vec::new();
        engine()
            .resample_block(0, &tone(4_800), &gappy, &mut CarryState::default(), &mut out)
            .unwrap();
        assert_eq!(out.len(), 4_800);
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn unusable_curve_passes_input_through() {
        let input = tone(1_000);
        for c in [
            SpeedCurve::default(),
            curve(&[(0.0, 1_000.0)]),
            curve(&[(0.0, f64::NAN), (0.01, f64::NAN), (0.02, 1_000.0)]),
        ] {
            let mut out = Vec::new();
            let outcome = engine()
                .resample_block(0, &input, &c, &mut CarryState::default(), &mut out)
                .unwrap();
            assert_eq!(outcome, BlockOutcome::PassedThrough { frames: 1_000 });
            assert_eq!(out, input);
        }
    }

    #[test]
    fn unordered_curve_is_an_error() {
        let err = engine()
            .prepare(2, &curve(&[(0.0, 1_000.0), (0.2, 1_000.0), (0.1, 1_000.0)]))
            .unwrap_err();
        assert!(matches!(err, DewowError::UnorderedCurve { block: 2, point: 2 }));
    }

    #[test]
    fn chunk_threshold_does_not_change_output() {
        let input = tone(9_600);
        let wobbly: Vec<(f64, f64)> = (0..=40)
            .map(|k| (k as f64 * 0.005, 1_000.0 + 30.0 * (k as f64 * 0.4).sin()))
            .collect();
        let c = curve(&wobbly);

        let mut whole = Vec::new();
        let mut carry_a = CarryState::default();
        let one = engine()
            .resample_block(0, &input, &c, &mut carry_a, &mut whole)
            .unwrap();

        let mut split = Vec::new();
        let mut carry_b = CarryState::default();
        let many = engine()
            .with_chunk_threshold(500)
            .resample_block(0, &input, &c, &mut carry_b, &mut split)
            .unwrap();

        assert!(matches!(one, BlockOutcome::Resampled { chunks: 1, .. }));
        assert!(matches!(many, BlockOutcome::Resampled { chunks, .. } if chunks > 1));
        assert_eq!(whole.len(), split.len());
        for (a, b) in whole.iter().zip(&split) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(carry_a.err, carry_b.err, epsilon = 1e-9);
        assert_abs_diff_eq!(carry_a.offset, carry_b.offset, epsilon = 1e-6);
    }

    #[test]
    fn first_point_anchors_the_block_offset() {
        let e = engine();
        let mut carry = CarryState::default();
        let c = prepared(&e, &curve(&[(0.01, 1_000.0), (0.02, 1_000.0)]));
        let chunks = e.output_positions(0, &c, &mut carry).unwrap();
        assert_eq!(chunks[0].base_offset, 480.0);
        assert_eq!(chunks[0].positions.len(), 480);
        assert_eq!(carry.offset, 960.0);
    }

    #[test]
    fn error_carries_into_the_next_block() {
        let e = engine();
        let mut carry = CarryState::default();
        // 0.5 samples of residue per block
        let half = prepared(&e, &curve(&[(0.0, 1_000.0), (100.5 / SR as f64, 1_000.0)]));
        let first: usize = e
            .output_positions(0, &half, &mut carry)
            .unwrap()
            .iter()
            .map(|c| c.positions.len())
            .sum();
        let second: usize = e
            .output_positions(1, &half, &mut carry)
            .unwrap()
            .iter()
            .map(|c| c.positions.len())
            .sum();
        assert_eq!(first + second, 201);
    }

    #[test]
    fn sinc_mode_matches_input_at_unit_speed() {
        let input = tone(2_400);
        let e = ResampleEngine::new(SR, 1_000.0, Interpolation::Sinc { quality: 16 }).unwrap();
        let mut out = Vec::new();
        e.resample_block(
            0,
            &input,
            &curve(&[(0.0, 1_000.0), (0.05, 1_000.0)]),
            &mut CarryState::default(),
            &mut out,
        )
        .unwrap();
        assert_eq!(out.len(), input.len());
        for (a, b) in out.iter().zip(&input) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(ResampleEngine::new(0, 1_000.0, Interpolation::Linear).is_err());
        assert!(ResampleEngine::new(SR, 0.0, Interpolation::Linear).is_err());
        assert!(ResampleEngine::new(SR, 1_000.0, Interpolation::Sinc { quality: 0 }).is_err());
    }
}
