//! Planning progress tracking: folds planning sub-events into a single
//! snapshot. Pure reducer, no I/O.

use serde_json::Value;
use tracing::debug;

use taskdeck_client::PlanningEvent;
use taskdeck_types::PlanningProgress;

/// Folds planning-phase events into a monotonic progress snapshot.
#[derive(Debug, Default)]
pub struct PlanningTracker {
    progress: PlanningProgress,
}

impl PlanningTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an empty snapshot. Called exactly once per new
    /// observation session.
    pub fn reset(&mut self) {
        self.progress = PlanningProgress::default();
    }

    pub fn snapshot(&self) -> PlanningProgress {
        self.progress.clone()
    }

    /// Fold one planning event. Stage and message track the latest event;
    /// the percent never regresses -- a late-arriving lower value is logged
    /// as an anomaly and the previous value retained.
    pub fn fold(&mut self, event: &PlanningEvent) {
        let stage = event
            .data
            .get("stage")
            .and_then(Value::as_str)
            .unwrap_or_else(|| event.stage_suffix());
        if !stage.is_empty() {
            self.progress.stage = stage.to_string();
        }

        if let Some(message) = event.data.get("message").and_then(Value::as_str) {
            self.progress.message = message.to_string();
        }

        let percent = event
            .data
            .get("progress")
            .or_else(|| event.data.get("percent"))
            .and_then(Value::as_f64);
        if let Some(percent) = percent {
            if percent < self.progress.percent {
                debug!(
                    incoming = percent,
                    current = self.progress.percent,
                    event_type = %event.event_type,
                    "planning percent regressed, keeping previous value"
                );
            } else {
                self.progress.percent = percent;
            }
        }
    }
}
