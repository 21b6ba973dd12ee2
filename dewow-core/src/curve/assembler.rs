//! Trace stage: frame reader → STFT → peak tracer, with overlap trimming.
//!
//! ## Trimming
//!
//! Blocks are analysed with a centered STFT whose hop is the framing hop, so
//! frame `j` of a block sits at block sample `j * hop`. With
//! `half = overlap / 2` and `lag = (fft_size / 2) / hop`:
//!
//! - block 0 is traced from the caller's start time and keeps
//!   `trace[..len - half]`;
//! - block `i > 0` is traced from frame `lag` and keeps
//!   `trace[half - lag .. len - half]`.
//!
//! The kept head of block `i` is then hop-grid index `half`, one hop after
//! the kept tail of block `i - 1`, so the concatenated curve has no gaps and
//! no duplicates.

use tracing::{debug, info, info_span, warn};

use super::{BlockCurve, SpeedCurve, SpeedCurveSet};
use crate::analysis::{Stft, WindowKind};
use crate::audio::FrameSource;
use crate::buffering::{block::Block, BlockFraming};
use crate::engine::pipeline::PipelineContext;
use crate::error::{DewowError, Result};
use crate::events::{PipelineEvent, Stage};
use crate::tracer::{PeakTracer, Trace};

pub struct CurveAssembler {
    framing: BlockFraming,
    stft: Stft,
    tracer: PeakTracer,
    /// Absolute start of the clean reference tone (seconds), used for block 0.
    start_time: f64,
}

impl CurveAssembler {
    pub fn new(
        framing: BlockFraming,
        fft_size: usize,
        window: WindowKind,
        tracer: PeakTracer,
        start_time: f64,
    ) -> Result<Self> {
        framing.validate()?;
        if !start_time.is_finite() || start_time < 0.0 {
            return Err(DewowError::InvalidConfig(format!(
                "start time must be a non-negative number of seconds, got {start_time}"
            )));
        }
        let stft = Stft::new(fft_size, framing.hop, window)?;
        Ok(Self {
            framing,
            stft,
            tracer,
            start_time,
        })
    }

    /// Frames skipped at the head of every block after the first.
    pub fn lag(&self) -> usize {
        (self.stft.fft_size() / 2) / self.framing.hop
    }

    /// Block-relative time the tracer starts at for block `index`.
    pub fn analysis_start(&self, index: usize, sample_rate: u32) -> f64 {
        if index == 0 {
            self.start_time
        } else {
            (self.lag() * self.framing.hop) as f64 / sample_rate as f64
        }
    }

    /// Drop the overlap-influenced head and tail of a block's trace.
    pub fn trim(&self, index: usize, trace: &Trace) -> SpeedCurve {
        let half = self.framing.half_overlap();
        let end = trace.len().saturating_sub(half);
        let head = if index == 0 {
            0
        } else {
            half.saturating_sub(self.lag())
        };
        if head >= end {
            return SpeedCurve::default();
        }
        let kept = Trace {
            times: trace.times[head..end].to_vec(),
            frequencies: trace.frequencies[head..end].to_vec(),
        };
        SpeedCurve::from_trace(&kept)
    }

    /// Trace and trim one block's `channel`.
    pub fn trace_block(&self, block: &Block, channel: usize) -> Result<SpeedCurve> {
        let samples = block.channel(channel).ok_or(DewowError::ChannelOutOfRange {
            channel,
            channels: block.channels,
        })?;
        let spec = self.stft.magnitudes(&samples, block.sample_rate, true);
        let start = self.analysis_start(block.index, block.sample_rate);
        let trace = self.tracer.trace(&spec, Some(start), None);
        debug!(
            index = block.index,
            frames = spec.len(),
            traced = trace.len(),
            dropouts = trace.dropouts(),
            "traced block"
        );
        Ok(self.trim(block.index, &trace))
    }

    /// Trace every block of `source` in order.
    ///
    /// `on_block` sees each block's curve as soon as it is ready (the store
    /// persists it there); an error from it aborts the stage. Clearing the
    /// context's running flag stops between blocks with
    /// `DewowError::Cancelled`.
    pub fn assemble<S, F>(
        &self,
        source: &mut S,
        channel: usize,
        ctx: &PipelineContext,
        mut on_block: F,
    ) -> Result<SpeedCurveSet>
    where
        S: FrameSource,
        F: FnMut(&BlockCurve) -> Result<()>,
    {
        let sample_rate = source.sample_rate();
        let channels = source.channels();
        if channel >= channels {
            return Err(DewowError::ChannelOutOfRange { channel, channels });
        }

        let _span = info_span!("trace", channel, sample_rate).entered();
        let reader = source.blocks(self.framing);
        let blocks = reader.block_count();
        info!(
            blocks,
            fft_size = self.stft.fft_size(),
            mode = ?self.tracer.mode(),
            start_time = self.start_time,
            "trace stage started"
        );
        ctx.emit(PipelineEvent::StageStarted {
            stage: Stage::Trace,
            channel,
            blocks,
        });

        if self.start_time * sample_rate as f64 >= self.framing.block_len() as f64 {
            warn!(
                start_time = self.start_time,
                "start time lies beyond the first block; block 0 will be empty"
            );
        }

        let mut set = SpeedCurveSet::new(sample_rate);
        for block in reader {
            if !ctx.is_running() {
                warn!(completed = set.len(), "trace stage cancelled");
                return Err(DewowError::Cancelled);
            }
            let block = block?;
            ctx.diagnostics.record_block_read(block.frames());

            let curve = self.trace_block(&block, channel)?;
            let points = curve.len();
            let dropouts = points - curve.valid_count();
            if curve.valid_count() < 2 {
                warn!(index = block.index, points, "block has no usable trace points");
            } else if dropouts > 0 {
                warn!(index = block.index, dropouts, "reference tone lost in block");
            }

            let block_curve = BlockCurve {
                index: block.index,
                start_sample: block.start,
                curve,
            };
            on_block(&block_curve)?;

            ctx.diagnostics.record_block_traced(points, dropouts);
            ctx.emit(PipelineEvent::BlockTraced {
                index: block.index,
                blocks,
                points,
                dropouts,
            });
            set.insert(block_curve);
        }

        info!(blocks = set.len(), "trace stage finished");
        ctx.emit(PipelineEvent::StageFinished {
            stage: Stage::Trace,
            channel,
            blocks: set.len(),
        });
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemorySource;
    use crate::tracer::{Adaptation, SearchBand, TraceMode};

    const SR: u32 = 8_000;

    fn assembler(framing: BlockFraming) -> CurveAssembler {
        let tracer = PeakTracer::new(
            TraceMode::CenterOfGravity,
            Adaptation::Average,
            SearchBand::new(900.0, 1_100.0).unwrap(),
            1.0,
        );
        CurveAssembler::new(framing, 512, WindowKind::Hann, tracer, 0.0).unwrap()
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * 1_000.0 * i as f64 / SR as f64).sin() as f32)
            .collect()
    }

    fn fake_trace(len: usize) -> Trace {
        Trace {
            times: (0..len).map(|j| j as f64).collect(),
            frequencies: vec![1_000.0; len],
        }
    }

    #[test]
    fn trims_half_overlap_and_lag() {
        // lag = 256 / 32 = 8, half = 50
        let a = assembler(BlockFraming::new(1_000, 100, 32));
        assert_eq!(a.lag(), 8);
        let first = a.trim(0, &fake_trace(1_000));
        assert_eq!(first.len(), 950);
        let later = a.trim(1, &fake_trace(992));
        assert_eq!(later.len(), 992 - 42 - 50);
        assert_eq!(later.first_time(), Some(42.0));
        assert!(a.trim(1, &fake_trace(60)).is_empty());
    }

    #[test]
    fn analysis_start_skips_fft_edge_after_first_block() {
        let a = assembler(BlockFraming::new(1_000, 100, 32));
        assert_eq!(a.analysis_start(0, SR), 0.0);
        assert!((a.analysis_start(3, SR) - 256.0 / 8_000.0).abs() < 1e-12);
    }

    #[test]
    fn concatenated_curve_tiles_the_hop_grid() {
        let framing = BlockFraming::new(100, 20, 32);
        let a = assembler(framing);
        let mut source = MemorySource::mono(tone(10_000), SR);
        let mut seen = Vec::new();
        let set = a
            .assemble(&mut source, 0, &PipelineContext::default(), |b| {
                seen.push(b.index);
                Ok(())
            })
            .unwrap();

        assert_eq!(set.len(), framing.block_count(10_000));
        assert_eq!(seen, (0..set.len()).collect::<Vec<_>>());
        let whole = set.concatenated();
        assert!(whole.is_time_ordered());
        let hop = 32.0 / SR as f64;
        for w in whole.points().windows(2) {
            assert!((w[1].time - w[0].time - hop).abs() < 1e-9);
        }
        for p in whole.points() {
            assert!((p.frequency - 1_000.0).abs() < 2.0, "{p:?}");
        }
    }

    #[test]
    fn stops_when_running_flag_is_cleared() {
        let a = assembler(BlockFraming::new(100, 20, 32));
        let mut source = MemorySource::mono(tone(10_000), SR);
        let ctx = PipelineContext::default();
        let mut count = 0;
        let result = a.assemble(&mut source, 0, &ctx, |_| {
            count += 1;
            if count == 2 {
                ctx.stop();
            }
            Ok(())
        });
        assert!(matches!(result, Err(DewowError::Cancelled)));
        assert_eq!(count, 2);
    }

    #[test]
    fn rejects_missing_channel() {
        let a = assembler(BlockFraming::new(100, 20, 32));
        let mut source = MemorySource::mono(tone(1_000), SR);
        let err = a
            .assemble(&mut source, 1, &PipelineContext::default(), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, DewowError::ChannelOutOfRange { channel: 1, channels: 1 }));
    }
}
