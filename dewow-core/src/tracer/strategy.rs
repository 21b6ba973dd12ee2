//! Per-frame estimators and the prediction history behind `PeakTracer`.

use std::collections::VecDeque;

use super::Adaptation;

/// Estimates averaged by `Adaptation::Average`.
pub const AVERAGE_SPAN: usize = 8;

/// Inclusive range of FFT bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinWindow {
    pub lo: usize,
    pub hi: usize,
}

impl BinWindow {
    /// Bins covering `[lo_hz, hi_hz]`, rounded outward and clamped to the
    /// spectrum.
    pub fn from_hz(lo_hz: f64, hi_hz: f64, bin_hz: f64, bins: usize) -> Self {
        let last = bins.saturating_sub(1);
        let lo = (lo_hz / bin_hz).floor().max(0.0) as usize;
        let hi = ((hi_hz / bin_hz).ceil().max(0.0) as usize).min(last);
        Self { lo: lo.min(last), hi }
    }

    pub fn intersect(&self, other: &BinWindow) -> Self {
        Self {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.hi - self.lo + 1
        }
    }

    pub fn peak_magnitude(&self, frame: &[f32]) -> f32 {
        if self.is_empty() || self.hi >= frame.len() {
            return 0.0;
        }
        frame[self.lo..=self.hi].iter().copied().fold(0.0, f32::max)
    }
}

/// Recent valid estimates.
#[derive(Debug, Clone, Default)]
pub struct History {
    first: Option<f64>,
    recent: VecDeque<f64>,
}

impl History {
    pub fn push(&mut self, f: f64) {
        if self.first.is_none() {
            self.first = Some(f);
        }
        if self.recent.len() == AVERAGE_SPAN {
            self.recent.pop_front();
        }
        self.recent.push_back(f);
    }

    /// Expected frequency of the next frame, or `None` with no history.
    pub fn predict(&self, adaptation: Adaptation) -> Option<f64> {
        let last = *self.recent.back()?;
        Some(match adaptation {
            Adaptation::Average => self.recent.iter().sum::<f64>() / self.recent.len() as f64,
            Adaptation::Linear => match self.recent.len() {
                n if n >= 2 => 2.0 * last - self.recent[n - 2],
                _ => last,
            },
            Adaptation::Constant => last,
            Adaptation::None => self.first.unwrap_or(last),
        })
    }
}

/// Band-limited spectrum and estimate of the last valid frame.
#[derive(Debug, Clone)]
pub struct Previous {
    band: BinWindow,
    spectrum: Vec<f32>,
    frequency: f64,
}

impl Previous {
    pub fn capture(frame: &[f32], band: BinWindow, frequency: f64) -> Self {
        let spectrum = if band.is_empty() || band.hi >= frame.len() {
            Vec::new()
        } else {
            frame[band.lo..=band.hi].to_vec()
        };
        Self {
            band,
            spectrum,
            frequency,
        }
    }
}

pub fn center_of_gravity(frame: &[f32], window: BinWindow, bin_hz: f64) -> Option<f64> {
    if window.is_empty() || window.hi >= frame.len() {
        return None;
    }
    let (weighted, total) = (window.lo..=window.hi).fold((0.0f64, 0.0f64), |(w, t), k| {
        let m = frame[k] as f64;
        (w + m * k as f64, t + m)
    });
    (total > 0.0).then(|| weighted / total * bin_hz)
}

pub fn parabolic_peak(frame: &[f32], window: BinWindow, bin_hz: f64) -> Option<f64> {
    if window.is_empty() || window.hi >= frame.len() {
        return None;
    }
    let k = (window.lo..=window.hi).max_by(|&a, &b| frame[a].total_cmp(&frame[b]))?;
    if k == 0 || k + 1 >= frame.len() {
        return Some(k as f64 * bin_hz);
    }
    let ln = |m: f32| (m.max(1e-12) as f64).ln();
    let delta = refine(ln(frame[k - 1]), ln(frame[k]), ln(frame[k + 1]));
    Some((k as f64 + delta) * bin_hz)
}

/// Shift of the current spectrum against the previous frame's, added to the
/// previous estimate.
pub fn correlation_shift(
    frame: &[f32],
    previous: &Previous,
    band: BinWindow,
    window: BinWindow,
    bin_hz: f64,
) -> Option<f64> {
    if previous.band != band || previous.spectrum.is_empty() || band.hi >= frame.len() {
        return parabolic_peak(frame, window, bin_hz);
    }
    let current = &frame[band.lo..=band.hi];
    let max_lag = (window.len() / 2).max(1) as isize;

    let score = |lag: isize| -> f64 {
        previous
            .spectrum
            .iter()
            .enumerate()
            .filter_map(|(k, &p)| {
                let idx = k as isize + lag;
                (idx >= 0 && (idx as usize) < current.len())
                    .then(|| p as f64 * current[idx as usize] as f64)
            })
            .sum()
    };

    let scores: Vec<f64> = (-max_lag..=max_lag).map(score).collect();
    let (best, _) = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    let delta = if best > 0 && best + 1 < scores.len() {
        refine(scores[best - 1], scores[best], scores[best + 1])
    } else {
        0.0
    };
    let lag = best as f64 - max_lag as f64 + delta;
    Some(previous.frequency + lag * bin_hz)
}

/// Vertex offset of the parabola through three equally spaced points,
/// limited to half a step.
fn refine(a: f64, b: f64, c: f64) -> f64 {
    let denom = a - 2.0 * b + c;
    if denom >= 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_rounds_outward_and_clamps() {
        let w = BinWindow::from_hz(900.0, 1_100.0, 15.625, 257);
        assert_eq!(w, BinWindow { lo: 57, hi: 71 });
        let edge = BinWindow::from_hz(3_900.0, 5_000.0, 15.625, 257);
        assert_eq!(edge.hi, 256);
        let empty = w.intersect(&BinWindow { lo: 80, hi: 90 });
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.peak_magnitude(&[1.0; 257]), 0.0);
    }

    #[test]
    fn predictions_per_adaptation() {
        let mut h = History::default();
        assert_eq!(h.predict(Adaptation::Average), None);
        for f in [1_000.0, 1_002.0, 1_004.0] {
            h.push(f);
        }
        assert_eq!(h.predict(Adaptation::Average), Some(1_002.0));
        assert_eq!(h.predict(Adaptation::Linear), Some(1_006.0));
        assert_eq!(h.predict(Adaptation::Constant), Some(1_004.0));
        assert_eq!(h.predict(Adaptation::None), Some(1_000.0));
    }

    #[test]
    fn average_uses_a_bounded_span() {
        let mut h = History::default();
        h.push(0.0);
        for _ in 0..AVERAGE_SPAN {
            h.push(8.0);
        }
        assert_eq!(h.predict(Adaptation::Average), Some(8.0));
        assert_eq!(h.predict(Adaptation::None), Some(0.0));
    }

    #[test]
    fn center_of_gravity_of_symmetric_peak() {
        let mut frame = vec![0.0f32; 32];
        frame[9] = 0.5;
        frame[10] = 1.0;
        frame[11] = 0.5;
        let f = center_of_gravity(&frame, BinWindow { lo: 5, hi: 15 }, 10.0).unwrap();
        assert!((f - 100.0).abs() < 1e-9);
        assert_eq!(center_of_gravity(&[0.0; 32], BinWindow { lo: 5, hi: 15 }, 10.0), None);
    }

    #[test]
    fn parabolic_peak_moves_toward_stronger_neighbour() {
        let mut frame = vec![1e-3f32; 32];
        frame[9] = 0.2;
        frame[10] = 1.0;
        frame[11] = 0.6;
        let f = parabolic_peak(&frame, BinWindow { lo: 0, hi: 31 }, 10.0).unwrap();
        assert!(f > 100.0 && f < 105.0, "{f}");
    }

    #[test]
    fn correlation_follows_a_one_bin_shift() {
        let band = BinWindow { lo: 0, hi: 31 };
        let mut before = vec![0.0f32; 32];
        before[9] = 0.5;
        before[10] = 1.0;
        before[11] = 0.5;
        let prev = Previous::capture(&before, band, 100.0);
        let mut after = vec![0.0f32; 32];
        after[10] = 0.5;
        after[11] = 1.0;
        after[12] = 0.5;
        let f = correlation_shift(&after, &prev, band, BinWindow { lo: 6, hi: 14 }, 10.0).unwrap();
        assert!((f - 110.0).abs() < 1e-9, "{f}");
    }
}
