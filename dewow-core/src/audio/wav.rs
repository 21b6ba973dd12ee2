//! WAV file source and sink backed by `hound`.
//!
//! Integer PCM is scaled to f32 in [-1.0, 1.0]; output is always mono
//! 32-bit float at the source sample rate.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::info;

use super::{FrameSource, SampleSink};
use crate::error::Result;

/// Sequential frame reader over a WAV file.
pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    spec: WavSpec,
    total_frames: usize,
}

impl WavSource {
    /// Open a WAV file for reading.
    ///
    /// # Errors
    /// Returns `DewowError::Wav` if the file is missing or not a valid WAV.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)?;
        let spec = reader.spec();
        let total_frames = reader.duration() as usize;
        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            bits = spec.bits_per_sample,
            frames = total_frames,
            "opened WAV source"
        );
        Ok(Self {
            reader,
            spec,
            total_frames,
        })
    }
}

impl FrameSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    fn channels(&self) -> usize {
        usize::from(self.spec.channels.max(1))
    }

    fn total_frames(&self) -> usize {
        self.total_frames
    }

    fn read_frames(&mut self, out: &mut Vec<f32>, max_frames: usize) -> Result<usize> {
        let channels = self.channels();
        let wanted = max_frames * channels;
        let before = out.len();
        out.reserve(wanted);

        match self.spec.sample_format {
            SampleFormat::Float => {
                for s in self.reader.samples::<f32>().take(wanted) {
                    out.push(s?);
                }
            }
            SampleFormat::Int if self.spec.bits_per_sample <= 16 => {
                let scale = ((1_i32 << (self.spec.bits_per_sample - 1)) - 1) as f32;
                for s in self.reader.samples::<i16>().take(wanted) {
                    out.push(s? as f32 / scale);
                }
            }
            SampleFormat::Int => {
                let scale = ((1_i64 << (self.spec.bits_per_sample - 1)) - 1) as f32;
                for s in self.reader.samples::<i32>().take(wanted) {
                    out.push(s? as f32 / scale);
                }
            }
        }

        let frames = (out.len() - before) / channels;
        out.truncate(before + frames * channels);
        Ok(frames)
    }
}

/// Mono 32-bit float WAV writer.
///
/// Dropping the sink without calling [`WavSink::finalize`] still leaves a
/// readable file with everything written so far.
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    written: usize,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self { writer, written: 0 })
    }

    /// Samples written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and patch the WAV header.
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

impl SampleSink for WavSink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        for &s in samples {
            self.writer.write_sample(s)?;
        }
        self.written += samples.len();
        Ok(())
    }
}
