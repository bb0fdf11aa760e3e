//! Checkpoint records: human-in-the-loop gates that pause execution until
//! somebody approves or rejects the pending step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decision state of a checkpoint. The service resolves `Timeout` and
/// `AutoApproved` on its own; the client only ever submits `Approved` or
/// `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointDecision {
    Pending,
    Approved,
    Rejected,
    Timeout,
    AutoApproved,
}

/// A pending (or resolved) human approval gate for one step.
///
/// At most one checkpoint is active for a task at a time from the client's
/// point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub step_id: String,
    pub name: String,
    pub description: String,
    /// Open-ended preview of what the step is about to do.
    #[serde(default)]
    pub preview: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub decision: CheckpointDecision,
}

impl Checkpoint {
    pub fn is_pending(&self) -> bool {
        self.decision == CheckpointDecision::Pending
    }
}
