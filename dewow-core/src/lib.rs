//! # dewow-core
//!
//! Wow and flutter correction for digitized tape recordings.
//!
//! ## Architecture
//!
//! ```text
//! trace stage:    FrameSource → BlockReader → Stft → PeakTracer → CurveAssembler
//!                                                                      │
//!                                                        SpeedCurveSet (+ CurveStore .npy)
//!                                                                      │
//! resample stage: FrameSource → BlockReader ─────────────────► ResampleEngine → SampleSink
//! ```
//!
//! Both stages walk a file block by block in strict order. The resample stage
//! never looks at spectra, only at the `(time, frequency)` curves the trace
//! stage produced.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod buffering;
pub mod curve;
pub mod engine;
pub mod error;
pub mod events;
pub mod resample;
pub mod tracer;

// Convenience re-exports for downstream crates
pub use buffering::{block::Block, BlockFraming};
pub use curve::{BlockCurve, CurveProvider, SpeedCurve, SpeedCurveSet, SpeedPoint};
pub use engine::{EngineConfig, ResampleConfig, TraceConfig};
pub use error::DewowError;
pub use events::{PipelineEvent, Stage};
pub use resample::{CarryState, Interpolation, ResampleEngine};
pub use tracer::{Adaptation, PeakTracer, TraceMode};
