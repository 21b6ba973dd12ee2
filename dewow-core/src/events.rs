//! Progress events sent by the pipeline over a `crossbeam_channel`.
//!
//! Events serialize as JSON objects tagged by `kind`, with camelCase fields,
//! so a host can forward them unchanged (the CLI prints them with `--json`).

use serde::{Deserialize, Serialize};

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Trace,
    Resample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
        /// Channel being traced or resampled.
        channel: usize,
        /// Blocks expected from the source length.
        blocks: usize,
    },
    BlockTraced {
        index: usize,
        blocks: usize,
        /// Trace points kept after overlap trimming.
        points: usize,
        /// Kept points where the tone was lost.
        dropouts: usize,
    },
    BlockResampled {
        index: usize,
        blocks: usize,
        channel: usize,
        input_frames: usize,
        output_frames: usize,
        /// The block had no usable curve and was copied unchanged.
        passthrough: bool,
    },
    StageFinished {
        stage: Stage,
        channel: usize,
        blocks: usize,
    },
}

impl PipelineEvent {
    /// Fraction of blocks completed, for per-block events.
    pub fn progress(&self) -> Option<f32> {
        match self {
            PipelineEvent::BlockTraced { index, blocks, .. }
            | PipelineEvent::BlockResampled { index, blocks, .. } => {
                (*blocks > 0).then(|| (*index + 1) as f32 / *blocks as f32)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_event_serializes_with_kind_tag_and_camel_case_fields() {
        let event = PipelineEvent::BlockResampled {
            index: 2,
            blocks: 8,
            channel: 1,
            input_frames: 3_200,
            output_frames: 3_210,
            passthrough: false,
        };

        let json = serde_json::to_value(&event).expect("serialize block event");
        assert_eq!(json["kind"], "blockResampled");
        assert_eq!(json["inputFrames"], 3_200);
        assert_eq!(json["outputFrames"], 3_210);
        assert_eq!(json["passthrough"], false);

        let round_trip: PipelineEvent =
            serde_json::from_value(json).expect("deserialize block event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn stage_serializes_lowercase() {
        let event = PipelineEvent::StageStarted {
            stage: Stage::Trace,
            channel: 0,
            blocks: 3,
        };
        let json = serde_json::to_value(&event).expect("serialize stage event");
        assert_eq!(json["kind"], "stageStarted");
        assert_eq!(json["stage"], "trace");
        assert!(serde_json::from_str::<Stage>(r#""Trace""#).is_err());
    }

    #[test]
    fn progress_counts_completed_blocks() {
        let event = PipelineEvent::BlockTraced {
            index: 1,
            blocks: 4,
            points: 10,
            dropouts: 0,
        };
        assert_eq!(event.progress(), Some(0.5));
        let finished = PipelineEvent::StageFinished {
            stage: Stage::Trace,
            channel: 0,
            blocks: 4,
        };
        assert_eq!(finished.progress(), None);
    }
}
