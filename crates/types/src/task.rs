//! Authoritative task and step records as reported by the delegation service.
//!
//! The service owns these; the client holds a read-only cached copy that is
//! only ever replaced wholesale by a fresh fetch, never patched from stream
//! data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a task, as reported by the delegation service.
///
/// `Unknown` absorbs any value this client does not recognize yet so a new
/// server-side status never fails the whole task decode. Phase derivation
/// maps it to `Failed` (see [`crate::phase::derive_phase`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Planning,
    Ready,
    Executing,
    Paused,
    Checkpoint,
    Completed,
    Failed,
    Cancelled,
    Superseded,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    /// True once the service will never advance this task again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Superseded
        )
    }
}

/// Execution status of a single plan step. Steps only move forward; the
/// service enforces that, the client just mirrors it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    #[serde(alias = "executing")]
    Running,
    Done,
    Failed,
    Skipped,
    #[serde(other)]
    Unknown,
}

/// One step of an executed plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    /// Open-ended key/value payload produced by the step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
    /// Whether execution pauses at this step for a human decision.
    #[serde(default)]
    pub requires_checkpoint: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ordered position within the task's plan.
    #[serde(default)]
    pub position: u32,
}

impl Step {
    /// Non-empty outputs are what turn a completed step into a delivery.
    pub fn has_outputs(&self) -> bool {
        self.outputs.as_ref().is_some_and(|o| !o.is_empty())
    }
}

/// A delegated task: goal, status, and the ordered plan steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Overall progress percentage (0-100) as computed by the service.
    #[serde(default)]
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when planning itself failed, before any step ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning_error: Option<String>,
}
