//! Subcommand handlers.

use std::path::Path;
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use dewow_core::curve::{stats, CurveStats, CurveStore};
use dewow_core::engine::pipeline::{resample_file, trace_file, PipelineContext, ResampleSummary};
use dewow_core::{CurveProvider, PipelineEvent, SpeedCurveSet};
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands, ConfigAction, ResampleArgs, SharedArgs, TraceArgs};
use crate::settings::{default_settings_path, load_settings, save_settings, AppSettings};

pub fn run(cli: Cli) -> Result<()> {
    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    debug!(path = %settings_path.display(), "settings loaded");

    match cli.command {
        Commands::Trace {
            input,
            channel,
            no_save,
            shared,
            trace,
        } => {
            apply_shared(&mut settings, &shared);
            apply_trace(&mut settings, &trace);
            let channel = channel.unwrap_or(settings.trace_channel);
            let persist = settings.persist_curves && !no_save;
            let curves = run_trace(&settings, &input, channel, persist, cli.json)?;
            report_curves(&curves, stats::DEFAULT_LOW_LIMIT, stats::DEFAULT_HIGH_LIMIT, cli.json)
        }
        Commands::Resample {
            input,
            curves,
            channels,
            shared,
            resample,
        } => {
            apply_shared(&mut settings, &shared);
            apply_resample(&mut settings, &resample);
            let curve_source = curves.unwrap_or_else(|| input.clone());
            let channels = pick_channels(&settings, channels);
            let store = CurveStore::for_source(&curve_source);
            info!(dir = %store.dir().display(), source = %curve_source.display(), "reading speed curves per block");
            run_resample(&settings, &input, &channels, &store, cli.json)
        }
        Commands::Run {
            reference,
            target,
            trace_channel,
            channels,
            no_save,
            shared,
            trace,
            resample,
        } => {
            apply_shared(&mut settings, &shared);
            apply_trace(&mut settings, &trace);
            apply_resample(&mut settings, &resample);
            let target = target.unwrap_or_else(|| reference.clone());
            let trace_channel = trace_channel.unwrap_or(settings.trace_channel);
            let channels = pick_channels(&settings, channels);
            let persist = settings.persist_curves && !no_save;
            let curves = run_trace(&settings, &reference, trace_channel, persist, cli.json)?;
            run_resample(&settings, &target, &channels, &curves, cli.json)
        }
        Commands::Inspect { input, low, high } => inspect(&input, low, high, cli.json),
        Commands::Config { action } => config(action, &settings_path, &settings),
    }
}

fn apply_shared(settings: &mut AppSettings, args: &SharedArgs) {
    if let Some(nominal) = args.nominal {
        settings.nominal_frequency = Some(nominal);
    }
    if let Some(block_size) = args.block_size {
        settings.framing.block_size = block_size;
    }
    if let Some(overlap) = args.overlap {
        settings.framing.overlap = overlap;
    }
    if let Some(hop) = args.hop {
        settings.framing.hop = hop;
    }
    if let Some(start) = args.start {
        settings.trace.start_time = start;
    }
}

fn apply_trace(settings: &mut AppSettings, args: &TraceArgs) {
    let trace = &mut settings.trace;
    if let Some(fft_size) = args.fft_size {
        trace.fft_size = fft_size;
    }
    if let Some(low) = args.band_low {
        trace.band_low = low;
    }
    if let Some(high) = args.band_high {
        trace.band_high = high;
    }
    if let Some(tolerance) = args.tolerance {
        trace.tolerance = tolerance;
    }
    if let Some(adaptation) = args.adaptation {
        trace.adaptation = adaptation.into();
    }
    if let Some(mode) = args.mode {
        trace.mode = mode.into();
    }
}

fn apply_resample(settings: &mut AppSettings, args: &ResampleArgs) {
    let resample = &mut settings.resample;
    match (args.interpolation, args.quality) {
        (Some(kind), quality) => resample.interpolation = kind.with_quality(quality),
        (None, Some(quality)) => {
            resample.interpolation = dewow_core::Interpolation::Sinc { quality };
        }
        (None, None) => {}
    }
    if let Some(threshold) = args.chunk_threshold {
        resample.chunk_threshold = threshold;
    }
}

fn pick_channels(settings: &AppSettings, requested: Vec<usize>) -> Vec<usize> {
    if requested.is_empty() {
        settings.channels.clone()
    } else {
        requested
    }
}

fn run_trace(
    settings: &AppSettings,
    input: &Path,
    channel: usize,
    persist: bool,
    json: bool,
) -> Result<SpeedCurveSet> {
    let config = settings.engine_config()?;
    let (ctx, progress) = Progress::start(json);
    let result = trace_file(&config, input, channel, &ctx, persist);
    let snapshot = ctx.diagnostics.snapshot();
    progress.finish(ctx);
    let curves = result.with_context(|| format!("tracing {}", input.display()))?;
    debug!(?snapshot, "trace diagnostics");
    Ok(curves)
}

fn run_resample<C: CurveProvider>(
    settings: &AppSettings,
    input: &Path,
    channels: &[usize],
    curves: &C,
    json: bool,
) -> Result<()> {
    let config = settings.engine_config()?;
    let (ctx, progress) = Progress::start(json);
    let result = resample_file(&config, input, channels, curves, &ctx);
    let snapshot = ctx.diagnostics.snapshot();
    progress.finish(ctx);
    let written = result.with_context(|| format!("resampling {}", input.display()))?;
    debug!(?snapshot, "resample diagnostics");
    for (path, summary) in &written {
        report_written(path, summary, json)?;
    }
    Ok(())
}

/// Forwards pipeline events to the log, or to stdout as JSON lines.
struct Progress {
    handle: JoinHandle<()>,
}

impl Progress {
    fn start(json: bool) -> (PipelineContext, Self) {
        let (tx, rx) = unbounded();
        let handle = std::thread::spawn(move || forward_events(rx, json));
        (PipelineContext::default().with_events(tx), Self { handle })
    }

    /// Drop the last sender and wait for the forwarder to drain.
    fn finish(self, ctx: PipelineContext) {
        drop(ctx);
        if self.handle.join().is_err() {
            warn!("progress thread panicked");
        }
    }
}

fn forward_events(rx: Receiver<PipelineEvent>, json: bool) {
    for event in rx {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(%err, "failed to encode progress event"),
            }
            continue;
        }
        match &event {
            PipelineEvent::StageStarted {
                stage,
                channel,
                blocks,
            } => info!(?stage, channel, blocks, "stage started"),
            PipelineEvent::BlockTraced {
                index,
                points,
                dropouts,
                ..
            } => info!(
                block = index,
                points,
                dropouts,
                progress = event.progress().unwrap_or(0.0),
                "traced"
            ),
            PipelineEvent::BlockResampled {
                index,
                channel,
                output_frames,
                passthrough,
                ..
            } => info!(
                block = index,
                channel,
                output_frames,
                passthrough,
                progress = event.progress().unwrap_or(0.0),
                "resampled"
            ),
            PipelineEvent::StageFinished {
                stage,
                channel,
                blocks,
            } => info!(?stage, channel, blocks, "stage finished"),
        }
    }
}

fn report_curves(curves: &SpeedCurveSet, low: f64, high: f64, json: bool) -> Result<()> {
    let summary = stats::summarize(curves);
    report_stats(&summary, low, high, json)
}

fn report_stats(summary: &[CurveStats], low: f64, high: f64, json: bool) -> Result<()> {
    for stat in summary {
        if stat.is_unusable() {
            warn!(block = stat.index, "no valid speed point; block will pass through unchanged");
        } else if stat.too_low(low) || stat.too_high(high) {
            warn!(
                block = stat.index,
                min = stat.min_frequency,
                max = stat.max_frequency,
                "speed curve leaves the plausible range"
            );
        }
    }
    if json {
        println!("{}", serde_json::to_string(summary)?);
    } else {
        println!("{:>6} {:>8} {:>8} {:>10} {:>10}", "block", "points", "dropouts", "min Hz", "max Hz");
        for stat in summary {
            println!(
                "{:>6} {:>8} {:>8} {:>10} {:>10}",
                stat.index,
                stat.points,
                stat.dropouts,
                format_hz(stat.min_frequency),
                format_hz(stat.max_frequency),
            );
        }
    }
    Ok(())
}

fn format_hz(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |f| format!("{f:.2}"))
}

fn report_written(path: &Path, summary: &ResampleSummary, json: bool) -> Result<()> {
    if json {
        let line = serde_json::json!({
            "kind": "written",
            "path": path,
            "summary": summary,
        });
        println!("{line}");
    } else {
        println!(
            "{} (channel {}): {} -> {} frames, {} block(s) passed through",
            path.display(),
            summary.channel,
            summary.input_frames,
            summary.output_frames,
            summary.passed_through
        );
    }
    Ok(())
}

fn inspect(input: &Path, low: f64, high: f64, json: bool) -> Result<()> {
    let store = CurveStore::for_source(input);
    let found = store.discover()?;
    if found.is_empty() {
        bail!("no speed curves for {} in {}", input.display(), store.dir().display());
    }
    let mut summary = Vec::with_capacity(found.len());
    for (index, _) in found {
        summary.push(CurveStats::of(index, &store.load_block(index)?));
    }
    report_stats(&summary, low, high, json)
}

fn config(action: ConfigAction, path: &Path, settings: &AppSettings) -> Result<()> {
    match action {
        ConfigAction::Show => println!("{}", serde_json::to_string_pretty(settings)?),
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            save_settings(path, &AppSettings::default())
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "settings file written");
        }
    }
    Ok(())
}
