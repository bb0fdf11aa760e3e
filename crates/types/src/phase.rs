//! Phase derivation: the one place that maps a server-reported task status
//! onto the UI-facing lifecycle phase.
//!
//! Today the mapping is the identity for every recognized status; keeping it
//! behind one function means no other component re-implements status
//! comparisons, and any future collapsing of server statuses happens here.

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskStatus};

/// The single authoritative lifecycle phase of an observed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Ready,
    Executing,
    Paused,
    Checkpoint,
    Completed,
    Failed,
    Cancelled,
    Superseded,
}

impl Phase {
    /// Whether the event stream should be open for a task in this phase.
    pub fn is_live(&self) -> bool {
        matches!(self, Phase::Planning | Phase::Executing | Phase::Checkpoint)
    }

    /// Terminal phases never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Failed | Phase::Cancelled | Phase::Superseded
        )
    }
}

/// Derive the phase for a loaded task. Total and pure: a function of
/// `task.status` alone.
///
/// An unrecognized status fails closed to `Failed` -- never to `Completed`.
pub fn derive_phase(task: &Task) -> Phase {
    match task.status {
        TaskStatus::Planning => Phase::Planning,
        TaskStatus::Ready => Phase::Ready,
        TaskStatus::Executing => Phase::Executing,
        TaskStatus::Paused => Phase::Paused,
        TaskStatus::Checkpoint => Phase::Checkpoint,
        TaskStatus::Completed => Phase::Completed,
        TaskStatus::Failed => Phase::Failed,
        TaskStatus::Cancelled => Phase::Cancelled,
        TaskStatus::Superseded => Phase::Superseded,
        TaskStatus::Unknown => {
            tracing::warn!(task_id = %task.id, "unrecognized task status, treating as failed");
            Phase::Failed
        }
    }
}
