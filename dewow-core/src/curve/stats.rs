//! Per-block curve summaries for spotting bad traces before resampling.

use serde::Serialize;

use super::{SpeedCurve, SpeedCurveSet};

/// Frequency below which a block is flagged, in Hz.
pub const DEFAULT_LOW_LIMIT: f64 = 948.0;
/// Frequency above which a block is flagged, in Hz.
pub const DEFAULT_HIGH_LIMIT: f64 = 1_020.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveStats {
    pub index: usize,
    pub points: usize,
    pub dropouts: usize,
    /// `None` when the curve has no valid point.
    pub min_frequency: Option<f64>,
    pub max_frequency: Option<f64>,
}

impl CurveStats {
    pub fn of(index: usize, curve: &SpeedCurve) -> Self {
        let valid = curve
            .points()
            .iter()
            .filter(|p| p.is_valid())
            .map(|p| p.frequency);
        let (min, max) = valid.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), f| {
            (
                Some(lo.map_or(f, |lo| lo.min(f))),
                Some(hi.map_or(f, |hi| hi.max(f))),
            )
        });
        Self {
            index,
            points: curve.len(),
            dropouts: curve.len() - curve.valid_count(),
            min_frequency: min,
            max_frequency: max,
        }
    }

    pub fn too_low(&self, limit: f64) -> bool {
        self.min_frequency.is_some_and(|f| f < limit)
    }

    pub fn too_high(&self, limit: f64) -> bool {
        self.max_frequency.is_some_and(|f| f > limit)
    }

    /// Fewer than two valid points: the block will be passed through.
    pub fn is_unusable(&self) -> bool {
        self.points - self.dropouts < 2
    }
}

pub fn summarize(set: &SpeedCurveSet) -> Vec<CurveStats> {
    set.iter()
        .map(|b| CurveStats::of(b.index, &b.curve))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{BlockCurve, SpeedPoint};

    #[test]
    fn stats_ignore_dropouts_and_flag_limits() {
        let curve = SpeedCurve::new(vec![
            SpeedPoint::new(0.0, 990.0),
            SpeedPoint::new(1.0, f64::NAN),
            SpeedPoint::new(2.0, 1_025.0),
        ]);
        let stats = CurveStats::of(4, &curve);
        assert_eq!(stats.points, 3);
        assert_eq!(stats.dropouts, 1);
        assert_eq!(stats.min_frequency, Some(990.0));
        assert_eq!(stats.max_frequency, Some(1_025.0));
        assert!(!stats.too_low(DEFAULT_LOW_LIMIT));
        assert!(stats.too_high(DEFAULT_HIGH_LIMIT));
        assert!(!stats.is_unusable());
    }

    #[test]
    fn empty_curve_is_unusable_but_not_flagged() {
        let stats = CurveStats::of(0, &SpeedCurve::default());
        assert!(stats.is_unusable());
        assert!(!stats.too_low(DEFAULT_LOW_LIMIT));
        assert!(!stats.too_high(DEFAULT_HIGH_LIMIT));
    }

    #[test]
    fn summary_follows_block_order() {
        let mut set = SpeedCurveSet::new(8_000);
        for index in [3, 1] {
            set.insert(BlockCurve {
                index,
                start_sample: 0,
                curve: SpeedCurve::default(),
            });
        }
        let indices: Vec<usize> = summarize(&set).iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 3]);
    }
}
