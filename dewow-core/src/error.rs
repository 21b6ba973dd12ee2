use thiserror::Error;

/// All errors produced by dewow-core.
#[derive(Debug, Error)]
pub enum DewowError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("channel {channel} out of range: source has {channels} channel(s)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    #[error("no speed curve for block {block}")]
    MissingCurve { block: usize },

    #[error("malformed speed curve {path}{}: {reason}", block_suffix(.block))]
    MalformedCurve {
        /// Set when the file was loaded as a block curve.
        block: Option<usize>,
        path: std::path::PathBuf,
        reason: String,
    },

    #[error("block {block}: speed curve times are not increasing at point {point}")]
    UnorderedCurve { block: usize, point: usize },

    #[error("block {block}: speed ratio {ratio} at point {point} is outside the accepted range")]
    InvalidSpeedRatio {
        block: usize,
        point: usize,
        ratio: f64,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn block_suffix(block: &Option<usize>) -> String {
    block.map(|b| format!(" for block {b}")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, DewowError>;
