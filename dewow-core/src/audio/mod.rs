//! Audio sources and sinks.
//!
//! The pipeline only needs two capabilities from the outside world:
//!
//! - sequential interleaved frame reads ([`FrameSource`]), wrapped into
//!   overlapped blocks by [`reader::BlockReader`];
//! - sequential mono sample writes with no seeking ([`SampleSink`]).
//!
//! WAV files are handled by [`wav`]; [`MemorySource`] and `Vec<f32>` cover
//! in-process use and tests.

pub mod reader;
pub mod wav;

use crate::buffering::BlockFraming;
use crate::error::Result;

pub use reader::BlockReader;
pub use wav::{WavSink, WavSource};

/// A sequential reader of interleaved f32 frames.
pub trait FrameSource {
    /// Sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Number of interleaved channels.
    fn channels(&self) -> usize;

    /// Total number of frames in the stream.
    fn total_frames(&self) -> usize;

    /// Append up to `max_frames` interleaved frames to `out`.
    ///
    /// Returns the number of whole frames appended; `0` means end of stream.
    fn read_frames(&mut self, out: &mut Vec<f32>, max_frames: usize) -> Result<usize>;

    /// Stream the rest of the source as overlapped blocks.
    fn blocks(&mut self, framing: BlockFraming) -> BlockReader<'_, Self>
    where
        Self: Sized,
    {
        BlockReader::new(self, framing)
    }
}

/// A sequential writer of mono f32 samples.
pub trait SampleSink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()>;
}

impl SampleSink for Vec<f32> {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        self.extend_from_slice(samples);
        Ok(())
    }
}

/// An in-memory interleaved frame source.
#[derive(Debug, Clone)]
pub struct MemorySource {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    cursor: usize,
}

impl MemorySource {
    /// Wrap interleaved samples. A trailing partial frame is ignored.
    pub fn new(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        Self {
            samples,
            channels,
            sample_rate,
            cursor: 0,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, 1, sample_rate)
    }

    /// Interleave equal-length channel buffers.
    pub fn from_channels(channels: &[Vec<f32>], sample_rate: u32) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        let mut samples = Vec::with_capacity(frames * channels.len());
        for i in 0..frames {
            for ch in channels {
                samples.push(ch[i]);
            }
        }
        Self::new(samples, channels.len(), sample_rate)
    }
}

impl FrameSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn total_frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn read_frames(&mut self, out: &mut Vec<f32>, max_frames: usize) -> Result<usize> {
        let remaining = self.total_frames().saturating_sub(self.cursor);
        let n = remaining.min(max_frames);
        let from = self.cursor * self.channels;
        out.extend_from_slice(&self.samples[from..from + n * self.channels]);
        self.cursor += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reads_whole_frames() {
        let mut src = MemorySource::new(vec![1.0, 2.0, 3.0, 4.0, 5.0], 2, 8_000);
        assert_eq!(src.total_frames(), 2);

        let mut out = Vec::new();
        assert_eq!(src.read_frames(&mut out, 1).unwrap(), 1);
        assert_eq!(out, vec![1.0, 2.0]);
        assert_eq!(src.read_frames(&mut out, 10).unwrap(), 1);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(src.read_frames(&mut out, 10).unwrap(), 0);
    }

    #[test]
    fn from_channels_interleaves() {
        let src = MemorySource::from_channels(&[vec![1.0, 2.0], vec![-1.0, -2.0]], 8_000);
        assert_eq!(src.channels(), 2);
        assert_eq!(src.samples, vec![1.0, -1.0, 2.0, -2.0]);
    }

    #[test]
    fn vec_sink_appends() {
        let mut sink: Vec<f32> = Vec::new();
        sink.write_samples(&[0.5, 0.25]).unwrap();
        sink.write_samples(&[0.125]).unwrap();
        assert_eq!(sink, vec![0.5, 0.25, 0.125]);
    }
}
