//! Speed curves: the only data the resample stage takes from the trace stage.
//!
//! Per-block curves carry block-relative times. `SpeedCurveSet` keeps them in
//! block-index order for the in-process handoff; `store` persists them as
//! `.npy` files for runs that split the stages.

pub mod assembler;
pub mod stats;
pub mod store;

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub use assembler::CurveAssembler;
pub use stats::CurveStats;
pub use store::CurveStore;

use crate::error::{DewowError, Result};
use crate::tracer::Trace;

/// One measurement of the reference tone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedPoint {
    /// Seconds.
    pub time: f64,
    /// Hz; `NaN` marks a tracking dropout.
    pub frequency: f64,
}

impl SpeedPoint {
    pub fn new(time: f64, frequency: f64) -> Self {
        Self { time, frequency }
    }

    pub fn is_valid(&self) -> bool {
        self.frequency.is_finite()
    }

    /// Speed ratio against the nominal reference frequency.
    pub fn ratio(&self, nominal_frequency: f64) -> f64 {
        self.frequency / nominal_frequency
    }
}

/// Time-ordered sequence of speed points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedCurve {
    points: Vec<SpeedPoint>,
}

impl SpeedCurve {
    pub fn new(points: Vec<SpeedPoint>) -> Self {
        Self { points }
    }

    pub fn from_trace(trace: &Trace) -> Self {
        Self::new(
            trace
                .times
                .iter()
                .zip(&trace.frequencies)
                .map(|(&t, &f)| SpeedPoint::new(t, f))
                .collect(),
        )
    }

    pub fn points(&self) -> &[SpeedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_valid()).count()
    }

    pub fn first_time(&self) -> Option<f64> {
        self.points.first().map(|p| p.time)
    }

    pub fn last_time(&self) -> Option<f64> {
        self.points.last().map(|p| p.time)
    }

    /// Index of the first point whose time does not strictly exceed its
    /// predecessor's, if any.
    pub fn first_unordered(&self) -> Option<usize> {
        self.points
            .windows(2)
            .position(|w| w[1].time.partial_cmp(&w[0].time) != Some(Ordering::Greater))
            .map(|i| i + 1)
    }

    pub fn is_time_ordered(&self) -> bool {
        self.first_unordered().is_none()
    }

    /// Replace dropouts by linear interpolation between the nearest valid
    /// neighbours, holding the first/last valid value at the edges.
    ///
    /// A curve with no valid point is returned unchanged.
    pub fn with_gaps_filled(&self) -> SpeedCurve {
        let valid: Vec<usize> = (0..self.points.len())
            .filter(|&i| self.points[i].is_valid())
            .collect();
        let (Some(&first), Some(&last)) = (valid.first(), valid.last()) else {
            return self.clone();
        };

        let mut points = self.points.clone();
        for p in &mut points[..first] {
            p.frequency = self.points[first].frequency;
        }
        for p in &mut points[last + 1..] {
            p.frequency = self.points[last].frequency;
        }
        for pair in valid.windows(2) {
            let (a, b) = (self.points[pair[0]], self.points[pair[1]]);
            for p in &mut points[pair[0] + 1..pair[1]] {
                let span = b.time - a.time;
                let w = if span > 0.0 { (p.time - a.time) / span } else { 0.0 };
                p.frequency = a.frequency + w * (b.frequency - a.frequency);
            }
        }
        SpeedCurve::new(points)
    }

    /// Append a point at `end_time` holding the last valid frequency, when
    /// `end_time` lies past the last point.
    pub fn extended_to(&self, end_time: f64) -> SpeedCurve {
        let mut out = self.clone();
        let last_valid = self.points.iter().rev().find(|p| p.is_valid());
        if let (Some(last), Some(valid)) = (self.points.last(), last_valid) {
            if end_time > last.time {
                out.points.push(SpeedPoint::new(end_time, valid.frequency));
            }
        }
        out
    }

    /// Prepend a point at `start_time` holding the first valid frequency,
    /// when `start_time` lies before the first point.
    pub fn extended_from(&self, start_time: f64) -> SpeedCurve {
        let first_valid = self.points.iter().find(|p| p.is_valid());
        match (self.points.first(), first_valid) {
            (Some(first), Some(valid)) if start_time < first.time => {
                let mut points = Vec::with_capacity(self.points.len() + 1);
                points.push(SpeedPoint::new(start_time, valid.frequency));
                points.extend_from_slice(&self.points);
                SpeedCurve::new(points)
            }
            _ => self.clone(),
        }
    }
}

/// A block's curve plus what is needed to place it in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCurve {
    pub index: usize,
    /// Stream offset of the block's first frame.
    pub start_sample: usize,
    pub curve: SpeedCurve,
}

/// Per-block curves of one source, ordered by block index.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedCurveSet {
    pub sample_rate: u32,
    blocks: BTreeMap<usize, BlockCurve>,
}

impl SpeedCurveSet {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            blocks: BTreeMap::new(),
        }
    }

    /// Insert or replace the curve for `block.index`.
    pub fn insert(&mut self, block: BlockCurve) {
        self.blocks.insert(block.index, block);
    }

    pub fn get(&self, index: usize) -> Option<&BlockCurve> {
        self.blocks.get(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockCurve> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whole-file curve in absolute seconds.
    pub fn concatenated(&self) -> SpeedCurve {
        let sr = self.sample_rate as f64;
        SpeedCurve::new(
            self.blocks
                .values()
                .flat_map(|b| {
                    let dt = b.start_sample as f64 / sr;
                    b.curve
                        .points()
                        .iter()
                        .map(move |p| SpeedPoint::new(p.time + dt, p.frequency))
                })
                .collect(),
        )
    }
}

/// Where the resample stage finds each block's curve.
///
/// Looked up one block at a time, so a bad curve only fails its own block.
pub trait CurveProvider {
    /// # Errors
    /// `DewowError::MissingCurve` when block `index` has no curve;
    /// implementations that read files may also fail with `MalformedCurve`.
    fn block_curve(&self, index: usize) -> Result<Cow<'_, SpeedCurve>>;

    /// Rate the curves were traced at, when known.
    fn sample_rate(&self) -> Option<u32> {
        None
    }
}

impl CurveProvider for SpeedCurveSet {
    fn block_curve(&self, index: usize) -> Result<Cow<'_, SpeedCurve>> {
        self.get(index)
            .map(|b| Cow::Borrowed(&b.curve))
            .ok_or(DewowError::MissingCurve { block: index })
    }

    fn sample_rate(&self) -> Option<u32> {
        Some(self.sample_rate)
    }
}
