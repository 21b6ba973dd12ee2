//! Typed audio block handed from the frame reader to both pipeline stages.

/// A contiguous, possibly overlapping slice of an audio stream.
///
/// Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone)]
pub struct Block {
    /// Sequence index in file order.
    pub index: usize,
    /// Offset of the first frame in the stream (frames).
    pub start: usize,
    /// Number of interleaved channels.
    pub channels: usize,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// `true` for the stream's final (possibly short) block.
    pub is_last: bool,
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
}

impl Block {
    /// Number of frames (samples per channel) in this block.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }

    /// De-interleave one channel.
    ///
    /// Returns `None` when `channel` is out of range.
    pub fn channel(&self, channel: usize) -> Option<Vec<f32>> {
        if channel >= self.channels {
            return None;
        }
        if self.channels == 1 {
            return Some(self.samples.clone());
        }
        Some(
            self.samples
                .iter()
                .skip(channel)
                .step_by(self.channels)
                .copied()
                .collect(),
        )
    }

    /// Returns true if the block contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
