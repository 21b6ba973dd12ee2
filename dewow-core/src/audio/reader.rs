//! Overlapped block reader.
//!
//! Reads `block_len` frames for the first block and `step` fresh frames for
//! every later one, prefixed with the previous block's last `overlap_len`
//! frames, so the source is read strictly sequentially.

use tracing::debug;

use super::FrameSource;
use crate::buffering::{block::Block, BlockFraming};
use crate::error::Result;

/// Iterator over the overlapped blocks of a [`FrameSource`].
pub struct BlockReader<'a, S: FrameSource> {
    source: &'a mut S,
    framing: BlockFraming,
    index: usize,
    block_count: usize,
    /// Interleaved tail of the previous block.
    carry: Vec<f32>,
    done: bool,
}

impl<'a, S: FrameSource> BlockReader<'a, S> {
    pub fn new(source: &'a mut S, framing: BlockFraming) -> Self {
        let block_count = framing.block_count(source.total_frames());
        Self {
            source,
            framing,
            index: 0,
            block_count,
            carry: Vec::new(),
            done: false,
        }
    }

    /// Number of blocks this reader will yield, from the source's length.
    pub fn block_count(&self) -> usize {
        self.block_count
    }
}

impl<S: FrameSource> Iterator for BlockReader<'_, S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let channels = self.source.channels();
        let wanted = if self.index == 0 {
            self.framing.block_len()
        } else {
            self.framing.step()
        };

        let mut samples = std::mem::take(&mut self.carry);
        let prefix = samples.len() / channels;
        let read = match self.source.read_frames(&mut samples, wanted) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if read == 0 {
            self.done = true;
            return None;
        }
        if read < wanted {
            self.done = true;
        }

        let frames = prefix + read;
        if !self.done {
            let keep_from = frames.saturating_sub(self.framing.overlap_len()) * channels;
            self.carry = samples[keep_from..].to_vec();
        }

        let block = Block {
            index: self.index,
            start: self.framing.block_start(self.index),
            channels,
            sample_rate: self.source.sample_rate(),
            is_last: self.done || self.index + 1 >= self.block_count,
            samples,
        };
        debug!(
            index = block.index,
            start = block.start,
            frames = block.frames(),
            "read block"
        );
        self.index += 1;
        Some(Ok(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySource;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn yields_expected_block_count_and_starts() {
        let framing = BlockFraming::new(10, 4, 1);
        let mut src = MemorySource::mono(ramp(25), 1_000);
        let blocks: Vec<_> = src.blocks(framing).map(|b| b.unwrap()).collect();

        assert_eq!(blocks.len(), framing.block_count(25));
        let starts: Vec<_> = blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0, 6, 12, 18]);
        for b in &blocks {
            assert_eq!(b.samples[0], b.start as f32, "block content must match its start");
        }
        assert!(blocks.last().unwrap().is_last);
        assert!(!blocks[0].is_last);
    }

    #[test]
    fn consecutive_blocks_share_exact_overlap() {
        let framing = BlockFraming::new(8, 2, 2);
        let mut src = MemorySource::mono(ramp(60), 1_000);
        let blocks: Vec<_> = src.blocks(framing).map(|b| b.unwrap()).collect();

        for pair in blocks.windows(2) {
            let tail = &pair[0].samples[pair[0].frames() - framing.overlap_len()..];
            let head = &pair[1].samples[..framing.overlap_len()];
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn final_block_may_be_short() {
        let framing = BlockFraming::new(10, 2, 1);
        let mut src = MemorySource::mono(ramp(13), 1_000);
        let blocks: Vec<_> = src.blocks(framing).map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].frames(), 5);
        assert_eq!(blocks[1].samples, vec![8.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn exact_fit_does_not_emit_empty_tail_block() {
        let framing = BlockFraming::new(10, 2, 1);
        let mut src = MemorySource::mono(ramp(18), 1_000);
        let blocks: Vec<_> = src.blocks(framing).map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].is_last);
    }

    #[test]
    fn stereo_blocks_keep_interleaving() {
        let framing = BlockFraming::new(4, 2, 1);
        let left: Vec<f32> = ramp(6);
        let right: Vec<f32> = left.iter().map(|v| -v).collect();
        let mut src = MemorySource::from_channels(&[left, right], 1_000);
        let blocks: Vec<_> = src.blocks(framing).map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].channel(0).unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(blocks[1].channel(1).unwrap(), vec![-2.0, -3.0, -4.0, -5.0]);
    }

    #[test]
    fn empty_source_yields_nothing() {
        let mut src = MemorySource::mono(Vec::new(), 1_000);
        assert_eq!(src.blocks(BlockFraming::new(4, 2, 1)).count(), 0);
    }
}
