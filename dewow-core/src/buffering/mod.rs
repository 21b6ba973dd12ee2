//! Block framing shared by the trace and resample stages.
//!
//! Both stages read a file as overlapping blocks. Sizes are expressed in
//! units of `hop` samples, which is also the STFT hop of the trace stage, so
//! one trace point corresponds to one `hop` of audio.
//!
//! ```text
//! block 0: [0 ............................ block_len)
//! block 1:                      [step ............................ step + block_len)
//!                               └ overlap_len ┘
//! ```

pub mod block;

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{DewowError, Result};

/// Overlapped block layout, in hop units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct BlockFraming {
    /// Block length in hops.
    pub block_size: usize,
    /// Overlap between consecutive blocks in hops. Must be even.
    pub overlap: usize,
    /// Sub-sampling factor applied to both `block_size` and `overlap` (samples).
    pub hop: usize,
}

impl Default for BlockFraming {
    fn default() -> Self {
        Self {
            block_size: 100_000,
            overlap: 100,
            hop: 32,
        }
    }
}

impl BlockFraming {
    pub fn new(block_size: usize, overlap: usize, hop: usize) -> Self {
        Self {
            block_size,
            overlap,
            hop,
        }
    }

    /// # Errors
    /// Returns `DewowError::InvalidConfig` for a zero hop, an overlap that is
    /// not smaller than the block, or an odd overlap (half of it is trimmed
    /// from each side of a block boundary).
    pub fn validate(&self) -> Result<()> {
        if self.hop == 0 {
            return Err(DewowError::InvalidConfig("hop must be > 0".into()));
        }
        if self.block_size <= self.overlap {
            return Err(DewowError::InvalidConfig(format!(
                "block size ({}) must exceed overlap ({})",
                self.block_size, self.overlap
            )));
        }
        if self.overlap % 2 != 0 {
            return Err(DewowError::InvalidConfig(format!(
                "overlap ({}) must be even",
                self.overlap
            )));
        }
        Ok(())
    }

    /// Block length in samples.
    pub fn block_len(&self) -> usize {
        self.block_size * self.hop
    }

    /// Overlap length in samples.
    pub fn overlap_len(&self) -> usize {
        self.overlap * self.hop
    }

    /// Distance between consecutive block starts in samples.
    pub fn step(&self) -> usize {
        self.block_len() - self.overlap_len()
    }

    /// Half the overlap in hops: the number of trace points trimmed on each
    /// side of a block boundary.
    pub fn half_overlap(&self) -> usize {
        self.overlap / 2
    }

    /// Stream offset of block `index` in samples.
    pub fn block_start(&self, index: usize) -> usize {
        index * self.step()
    }

    /// Number of blocks a stream of `total_frames` frames is split into.
    pub fn block_count(&self, total_frames: usize) -> usize {
        let block_len = self.block_len();
        if total_frames == 0 {
            0
        } else if total_frames <= block_len {
            1
        } else {
            1 + (total_frames - block_len).div_ceil(self.step())
        }
    }

    /// The part of a block that belongs to it alone once overlaps are split
    /// between neighbours, in block-relative samples.
    ///
    /// Block 0 starts at `first_sample` (the trace start); later blocks start
    /// half an overlap in. Every block but the last ends where the next
    /// block's span begins.
    pub fn nominal_span(
        &self,
        index: usize,
        block_frames: usize,
        is_last: bool,
        first_sample: usize,
    ) -> Range<usize> {
        let half = self.half_overlap() * self.hop;
        let head = if index == 0 { first_sample } else { half };
        let end = if is_last {
            block_frames
        } else {
            self.step() + half
        };
        let end = end.min(block_frames);
        head.min(end)..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_scale_with_hop() {
        let f = BlockFraming::new(1_000, 100, 32);
        assert_eq!(f.block_len(), 32_000);
        assert_eq!(f.overlap_len(), 3_200);
        assert_eq!(f.step(), 28_800);
        assert_eq!(f.half_overlap(), 50);
        assert_eq!(f.block_start(3), 86_400);
    }

    #[test]
    fn block_count_matches_overlapped_layout() {
        let f = BlockFraming::new(10, 2, 1);
        assert_eq!(f.block_count(0), 0);
        assert_eq!(f.block_count(1), 1);
        assert_eq!(f.block_count(10), 1);
        assert_eq!(f.block_count(11), 2);
        assert_eq!(f.block_count(18), 2);
        assert_eq!(f.block_count(19), 3);
    }

    #[test]
    fn validate_rejects_bad_layouts() {
        assert!(BlockFraming::new(10, 2, 0).validate().is_err());
        assert!(BlockFraming::new(10, 10, 1).validate().is_err());
        assert!(BlockFraming::new(10, 3, 1).validate().is_err());
        assert!(BlockFraming::default().validate().is_ok());
    }

    #[test]
    fn nominal_spans_tile_the_stream() {
        let f = BlockFraming::new(100, 20, 4);
        let total = 1_000;
        let count = f.block_count(total);
        let mut covered = Vec::new();
        for i in 0..count {
            let start = f.block_start(i);
            let frames = (total - start).min(f.block_len());
            let span = f.nominal_span(i, frames, i + 1 == count, 0);
            covered.push((start + span.start, start + span.end));
        }
        assert_eq!(covered.first().unwrap().0, 0);
        assert_eq!(covered.last().unwrap().1, total);
        for pair in covered.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "spans must be contiguous");
        }
    }
}
