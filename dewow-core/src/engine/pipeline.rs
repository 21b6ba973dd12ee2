//! Blocking stage drivers.
//!
//! ## Resample stage (per block)
//!
//! ```text
//! 1. Check running flag
//! 2. Fetch the block's curve (missing → MissingCurve, unreadable →
//!    MalformedCurve; both fatal, earlier blocks stay written)
//! 3. Compute the block's nominal span (the part no neighbour covers)
//! 4. Bridge the curve to the span edges, holding the nearest valid frequency
//! 5. Resample along the curve, or copy the span when the curve is unusable
//! 6. Record diagnostics, emit BlockResampled
//! ```
//!
//! One `CarryState` is threaded through all blocks of a channel. Everything
//! runs on the caller's thread; progress leaves through the optional
//! `crossbeam_channel::Sender` in `PipelineContext`.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::{
    audio::{FrameSource, SampleSink, WavSink, WavSource},
    curve::{CurveProvider, CurveStore, SpeedCurve, SpeedCurveSet},
    engine::EngineConfig,
    error::{DewowError, Result},
    events::{PipelineEvent, Stage},
    resample::{BlockOutcome, CarryState},
};

/// Counters shared with whoever drives the pipeline.
#[derive(Debug)]
pub struct PipelineDiagnostics {
    pub blocks_read: AtomicUsize,
    pub frames_in: AtomicUsize,
    pub blocks_traced: AtomicUsize,
    pub trace_points: AtomicUsize,
    pub trace_dropouts: AtomicUsize,
    pub blocks_resampled: AtomicUsize,
    pub blocks_passed_through: AtomicUsize,
    pub frames_out: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            blocks_read: AtomicUsize::new(0),
            frames_in: AtomicUsize::new(0),
            blocks_traced: AtomicUsize::new(0),
            trace_points: AtomicUsize::new(0),
            trace_dropouts: AtomicUsize::new(0),
            blocks_resampled: AtomicUsize::new(0),
            blocks_passed_through: AtomicUsize::new(0),
            frames_out: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn record_block_read(&self, frames: usize) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        self.frames_in.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_block_traced(&self, points: usize, dropouts: usize) {
        self.blocks_traced.fetch_add(1, Ordering::Relaxed);
        self.trace_points.fetch_add(points, Ordering::Relaxed);
        self.trace_dropouts.fetch_add(dropouts, Ordering::Relaxed);
    }

    pub fn record_block_resampled(&self, outcome: &BlockOutcome) {
        self.blocks_resampled.fetch_add(1, Ordering::Relaxed);
        if outcome.is_passthrough() {
            self.blocks_passed_through.fetch_add(1, Ordering::Relaxed);
        }
        self.frames_out
            .fetch_add(outcome.output_frames(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            blocks_traced: self.blocks_traced.load(Ordering::Relaxed),
            trace_points: self.trace_points.load(Ordering::Relaxed),
            trace_dropouts: self.trace_dropouts.load(Ordering::Relaxed),
            blocks_resampled: self.blocks_resampled.load(Ordering::Relaxed),
            blocks_passed_through: self.blocks_passed_through.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub blocks_read: usize,
    pub frames_in: usize,
    pub blocks_traced: usize,
    pub trace_points: usize,
    pub trace_dropouts: usize,
    pub blocks_resampled: usize,
    pub blocks_passed_through: usize,
    pub frames_out: usize,
}

/// Cancellation, progress and diagnostics handles for one run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Cleared by the caller to stop between blocks.
    pub running: Arc<AtomicBool>,
    pub events: Option<Sender<PipelineEvent>>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            events: None,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }
}

impl PipelineContext {
    pub fn with_events(mut self, events: Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Send a progress event; a dropped receiver is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("progress receiver dropped");
            }
        }
    }
}

/// Totals of one channel's resample stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResampleSummary {
    pub channel: usize,
    pub blocks: usize,
    pub passed_through: usize,
    pub input_frames: usize,
    pub output_frames: usize,
}

/// Trace `channel` of `source`, persisting curves to `store` when given.
pub fn trace_source<S: FrameSource>(
    config: &EngineConfig,
    source: &mut S,
    channel: usize,
    ctx: &PipelineContext,
    store: Option<&CurveStore>,
) -> Result<SpeedCurveSet> {
    config.validate_for(source.sample_rate())?;
    let assembler = config.curve_assembler()?;
    let set = assembler.assemble(source, channel, ctx, |block| {
        if let Some(store) = store {
            store.save_block(block)?;
        }
        Ok(())
    })?;
    if let Some(store) = store {
        let path = store.save_whole(&set.concatenated())?;
        info!(path = %path.display(), blocks = set.len(), "saved speed curves");
    }
    Ok(set)
}

/// Trace a WAV file, optionally writing `.npy` curves next to it.
pub fn trace_file(
    config: &EngineConfig,
    path: &Path,
    channel: usize,
    ctx: &PipelineContext,
    persist: bool,
) -> Result<SpeedCurveSet> {
    let mut source = WavSource::open(path)?;
    let store = CurveStore::for_source(path);
    trace_source(config, &mut source, channel, ctx, persist.then_some(&store))
}

/// Resample `channel` of `source` along `curves` into `sink`.
///
/// Curves are fetched one block at a time.
///
/// # Errors
/// `DewowError::MissingCurve` or `DewowError::MalformedCurve` when a block's
/// curve cannot be had; the blocks before it have already been written to
/// `sink`.
pub fn resample_source<S: FrameSource, C: CurveProvider + ?Sized>(
    config: &EngineConfig,
    source: &mut S,
    channel: usize,
    curves: &C,
    ctx: &PipelineContext,
    sink: &mut dyn SampleSink,
) -> Result<ResampleSummary> {
    let sample_rate = source.sample_rate();
    config.validate_for(sample_rate)?;
    let channels = source.channels();
    if channel >= channels {
        return Err(DewowError::ChannelOutOfRange { channel, channels });
    }
    if let Some(traced) = curves.sample_rate().filter(|&rate| rate != sample_rate) {
        warn!(
            curves = traced,
            source = sample_rate,
            "speed curves were traced at a different sample rate"
        );
    }

    let engine = config.resample_engine(sample_rate)?;
    let framing = config.framing;
    let first_sample = config.first_sample(sample_rate);

    let _span = info_span!("resample", channel, sample_rate).entered();
    let reader = source.blocks(framing);
    let blocks = reader.block_count();
    info!(
        blocks,
        interpolation = ?engine.interpolation(),
        nominal = config.nominal_frequency,
        "resample stage started"
    );
    ctx.emit(PipelineEvent::StageStarted {
        stage: Stage::Resample,
        channel,
        blocks,
    });

    let mut carry = CarryState::default();
    let mut summary = ResampleSummary {
        channel,
        ..ResampleSummary::default()
    };

    for block in reader {
        if !ctx.is_running() {
            warn!(completed = summary.blocks, "resample stage cancelled");
            return Err(DewowError::Cancelled);
        }
        let block = block?;
        ctx.diagnostics.record_block_read(block.frames());

        let samples = block.channel(channel).ok_or(DewowError::ChannelOutOfRange {
            channel,
            channels: block.channels,
        })?;
        let block_curve = curves.block_curve(block.index)?;

        let span = framing.nominal_span(block.index, samples.len(), block.is_last, first_sample);
        let curve = bridge(&block_curve, &span, sample_rate);

        let outcome = match engine.prepare(block.index, &curve)? {
            Some(prepared) => {
                engine.resample_prepared(block.index, &samples, &prepared, &mut carry, sink)?
            }
            None => {
                warn!(index = block.index, "no usable speed curve; block copied unchanged");
                sink.write_samples(&samples[span.clone()])?;
                BlockOutcome::PassedThrough { frames: span.len() }
            }
        };

        ctx.diagnostics.record_block_resampled(&outcome);
        summary.blocks += 1;
        summary.input_frames += span.len();
        summary.output_frames += outcome.output_frames();
        if outcome.is_passthrough() {
            summary.passed_through += 1;
        }
        debug!(
            index = block.index,
            span_start = span.start,
            span_end = span.end,
            output_frames = outcome.output_frames(),
            err = carry.err,
            "block done"
        );
        ctx.emit(PipelineEvent::BlockResampled {
            index: block.index,
            blocks,
            channel,
            input_frames: span.len(),
            output_frames: outcome.output_frames(),
            passthrough: outcome.is_passthrough(),
        });
    }

    info!(
        blocks = summary.blocks,
        passed_through = summary.passed_through,
        input_frames = summary.input_frames,
        output_frames = summary.output_frames,
        "resample stage finished"
    );
    ctx.emit(PipelineEvent::StageFinished {
        stage: Stage::Resample,
        channel,
        blocks: summary.blocks,
    });
    Ok(summary)
}

/// Resample each of `channels` of a WAV file into its own mono WAV file.
///
/// Returns the written paths in channel order. On error the current
/// channel's file keeps the blocks written before the failure.
pub fn resample_file<C: CurveProvider + ?Sized>(
    config: &EngineConfig,
    input: &Path,
    channels: &[usize],
    curves: &C,
    ctx: &PipelineContext,
) -> Result<Vec<(PathBuf, ResampleSummary)>> {
    let mut written = Vec::with_capacity(channels.len());
    for &channel in channels {
        let mut source = WavSource::open(input)?;
        let path = output_path(input, channel, channels.len() > 1);
        let mut sink = WavSink::create(&path, source.sample_rate())?;
        let summary = match resample_source(config, &mut source, channel, curves, ctx, &mut sink) {
            Ok(summary) => summary,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    channel,
                    frames = sink.written(),
                    "resample stopped; keeping partial output"
                );
                return Err(err);
            }
        };
        let frames = sink.written();
        sink.finalize()?;
        info!(path = %path.display(), channel, frames, "wrote corrected audio");
        written.push((path, summary));
    }
    Ok(written)
}

/// Trace `reference` and resample `target` with the curves handed over in
/// memory.
pub fn run_in_memory<R: FrameSource, T: FrameSource>(
    config: &EngineConfig,
    reference: &mut R,
    trace_channel: usize,
    target: &mut T,
    channel: usize,
    ctx: &PipelineContext,
    sink: &mut dyn SampleSink,
) -> Result<(SpeedCurveSet, ResampleSummary)> {
    let curves = trace_source(config, reference, trace_channel, ctx, None)?;
    let summary = resample_source(config, target, channel, &curves, ctx, sink)?;
    Ok((curves, summary))
}

/// `<stem>_resampled.wav`, or `<stem>_resampled_ch<c>.wav` when several
/// channels are written.
pub fn output_path(input: &Path, channel: usize, per_channel: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if per_channel {
        format!("{stem}_resampled_ch{channel}.wav")
    } else {
        format!("{stem}_resampled.wav")
    };
    input.with_file_name(name)
}

/// Extend `curve` to cover `span` by holding its edge frequencies.
fn bridge(curve: &SpeedCurve, span: &Range<usize>, sample_rate: u32) -> SpeedCurve {
    let sr = sample_rate as f64;
    let half_sample = 0.5 / sr;
    let head = span.start as f64 / sr;
    let end = span.end as f64 / sr;
    let mut bridged = curve.clone();
    if bridged.first_time().is_some_and(|t| t > head + half_sample) {
        bridged = bridged.extended_from(head);
    }
    if bridged.last_time().is_some_and(|t| t < end - half_sample) {
        bridged = bridged.extended_to(end);
    }
    bridged
}
