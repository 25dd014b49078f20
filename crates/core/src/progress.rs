//! Stage progress notifications for callers that display a running
//! evaluation.

use crate::error::Stage;
use crate::usage::StageUsage;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
    },
    StageFinished {
        stage: Stage,
        usage: StageUsage,
    },
    /// Emitted in rank order, after the finding for `paper_id` is final.
    PaperAssessed {
        paper_id: String,
        completed: usize,
        total: usize,
    },
}

impl ProgressEvent {
    /// Approximate share of the run completed, in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        match self {
            ProgressEvent::StageStarted { stage } => stage_start(*stage),
            ProgressEvent::StageFinished { stage, .. } => stage_end(*stage),
            ProgressEvent::PaperAssessed { completed, total, .. } => {
                let start = stage_start(Stage::Assessment);
                let span = stage_end(Stage::Assessment) - start;
                start + span * (*completed as f32 / (*total).max(1) as f32)
            }
        }
    }
}

fn stage_start(stage: Stage) -> f32 {
    match stage {
        Stage::Planning => 0.0,
        Stage::Retrieval => 0.1,
        Stage::Ranking => 0.3,
        Stage::Assessment => 0.4,
        Stage::Aggregation => 0.9,
    }
}

fn stage_end(stage: Stage) -> f32 {
    match stage {
        Stage::Planning => 0.1,
        Stage::Retrieval => 0.3,
        Stage::Ranking => 0.4,
        Stage::Assessment => 0.9,
        Stage::Aggregation => 1.0,
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_progress_interpolates_between_stage_bounds() {
        let halfway = ProgressEvent::PaperAssessed {
            paper_id: "p".to_string(),
            completed: 2,
            total: 4,
        };
        assert!((halfway.fraction() - 0.65).abs() < 1e-6);

        let done = ProgressEvent::StageFinished {
            stage: Stage::Aggregation,
            usage: StageUsage::default(),
        };
        assert_eq!(done.fraction(), 1.0);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = ProgressEvent::StageStarted { stage: Stage::Ranking };
        let json = serde_json::to_value(&event).expect("event serializes");
        assert_eq!(json["event"], "stage_started");
        assert_eq!(json["stage"], "ranking");
    }
}
