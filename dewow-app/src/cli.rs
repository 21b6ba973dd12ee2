//! Command-line interface for dewow
//!
//! Flags left unset fall back to the settings file, then to built-in
//! defaults.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dewow_core::{Adaptation, Interpolation, TraceMode};

/// Wow and flutter correction for digitized tape recordings
#[derive(Parser, Debug)]
#[command(name = "dewow", version, about = "Wow and flutter correction for digitized tape recordings")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to settings file (default: $XDG_DATA_HOME/dewow/settings.json)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Print progress events and reports as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Trace the reference tone and write per-block speed curves
    Trace {
        /// WAV file carrying the reference tone
        input: PathBuf,

        /// Channel holding the reference tone
        #[arg(long, value_name = "N")]
        channel: Option<usize>,

        /// Keep curves in memory only
        #[arg(long)]
        no_save: bool,

        #[command(flatten)]
        shared: SharedArgs,

        #[command(flatten)]
        trace: TraceArgs,
    },

    /// Resample a file along previously traced speed curves
    Resample {
        /// WAV file to correct
        input: PathBuf,

        /// File the curves were traced from (default: INPUT)
        #[arg(long, value_name = "PATH")]
        curves: Option<PathBuf>,

        /// Channels to correct, comma separated
        #[arg(long, value_name = "N,..", value_delimiter = ',')]
        channels: Vec<usize>,

        #[command(flatten)]
        shared: SharedArgs,

        #[command(flatten)]
        resample: ResampleArgs,
    },

    /// Trace and resample in one pass
    Run {
        /// WAV file carrying the reference tone
        reference: PathBuf,

        /// WAV file to correct (default: REFERENCE)
        #[arg(long, value_name = "PATH")]
        target: Option<PathBuf>,

        /// Channel holding the reference tone
        #[arg(long, value_name = "N")]
        trace_channel: Option<usize>,

        /// Channels to correct, comma separated
        #[arg(long, value_name = "N,..", value_delimiter = ',')]
        channels: Vec<usize>,

        /// Keep curves in memory only
        #[arg(long)]
        no_save: bool,

        #[command(flatten)]
        shared: SharedArgs,

        #[command(flatten)]
        trace: TraceArgs,

        #[command(flatten)]
        resample: ResampleArgs,
    },

    /// Summarize stored speed curves and flag implausible blocks
    Inspect {
        /// File the curves were traced from
        input: PathBuf,

        /// Flag blocks whose minimum frequency is below this (Hz)
        #[arg(long, default_value_t = dewow_core::curve::stats::DEFAULT_LOW_LIMIT)]
        low: f64,

        /// Flag blocks whose maximum frequency is above this (Hz)
        #[arg(long, default_value_t = dewow_core::curve::stats::DEFAULT_HIGH_LIMIT)]
        high: f64,
    },

    /// Show or initialize the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective settings as JSON
    Show,
    /// Print the settings file path
    Path,
    /// Write the default settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Options both stages must agree on.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct SharedArgs {
    /// Nominal reference tone frequency (Hz)
    #[arg(long, value_name = "HZ")]
    pub nominal: Option<f64>,

    /// Block length in hops
    #[arg(long, value_name = "HOPS")]
    pub block_size: Option<usize>,

    /// Block overlap in hops (even)
    #[arg(long, value_name = "HOPS")]
    pub overlap: Option<usize>,

    /// Hop in samples (also the STFT hop)
    #[arg(long, value_name = "SAMPLES")]
    pub hop: Option<usize>,

    /// Where the clean reference tone begins (seconds)
    #[arg(long, value_name = "SECONDS")]
    pub start: Option<f64>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct TraceArgs {
    /// STFT size in samples
    #[arg(long, value_name = "SAMPLES")]
    pub fft_size: Option<usize>,

    /// Lower edge of the search band (Hz)
    #[arg(long, value_name = "HZ")]
    pub band_low: Option<f64>,

    /// Upper edge of the search band (Hz)
    #[arg(long, value_name = "HZ")]
    pub band_high: Option<f64>,

    /// Search window half-width in semitones
    #[arg(long, value_name = "SEMITONES")]
    pub tolerance: Option<f64>,

    /// How the next frame's frequency is predicted
    #[arg(long, value_enum)]
    pub adaptation: Option<AdaptationArg>,

    /// Per-frame frequency estimator
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ResampleArgs {
    /// Interpolation used to read the input
    #[arg(long, value_enum)]
    pub interpolation: Option<InterpolationArg>,

    /// Sinc quality (1-100): input samples per output sample
    #[arg(long, value_name = "N")]
    pub quality: Option<u32>,

    /// Output positions buffered per chunk
    #[arg(long, value_name = "POSITIONS")]
    pub chunk_threshold: Option<usize>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    /// Center of gravity
    Cog,
    Peak,
    Correlation,
}

impl From<ModeArg> for TraceMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Cog => TraceMode::CenterOfGravity,
            ModeArg::Peak => TraceMode::Peak,
            ModeArg::Correlation => TraceMode::Correlation,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationArg {
    Average,
    Linear,
    Constant,
    None,
}

impl From<AdaptationArg> for Adaptation {
    fn from(arg: AdaptationArg) -> Self {
        match arg {
            AdaptationArg::Average => Adaptation::Average,
            AdaptationArg::Linear => Adaptation::Linear,
            AdaptationArg::Constant => Adaptation::Constant,
            AdaptationArg::None => Adaptation::None,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationArg {
    Linear,
    Sinc,
}

impl InterpolationArg {
    pub fn with_quality(self, quality: Option<u32>) -> Interpolation {
        match self {
            InterpolationArg::Linear => Interpolation::Linear,
            InterpolationArg::Sinc => Interpolation::Sinc {
                quality: quality.unwrap_or(Interpolation::DEFAULT_SINC_QUALITY),
            },
        }
    }
}
