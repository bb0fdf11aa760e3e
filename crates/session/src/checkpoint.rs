//! Checkpoint coordination: tracks the single active checkpoint for a task
//! and drives the approve/reject protocol.
//!
//! State machine per task: `{none} -> {active} -> {none}`. The server-driven
//! view always wins: when the task's phase leaves `Checkpoint`, the local
//! snapshot is dropped no matter how it was acquired.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use taskdeck_client::ApiClient;
use taskdeck_types::{Checkpoint, Phase};

use crate::error::SessionError;

pub struct CheckpointCoordinator {
    api: Arc<ApiClient>,
    task_id: String,
    active: Mutex<Option<Checkpoint>>,
}

impl CheckpointCoordinator {
    pub fn new(api: Arc<ApiClient>, task_id: impl Into<String>) -> Self {
        Self {
            api,
            task_id: task_id.into(),
            active: Mutex::new(None),
        }
    }

    pub fn active(&self) -> Option<Checkpoint> {
        self.active.lock().unwrap().clone()
    }

    /// Adopt a checkpoint delivered over the event stream.
    pub fn adopt(&self, checkpoint: Checkpoint) {
        debug!(task_id = %self.task_id, step_id = %checkpoint.step_id, "checkpoint active");
        *self.active.lock().unwrap() = Some(checkpoint);
    }

    pub fn clear(&self) {
        *self.active.lock().unwrap() = None;
    }

    /// Reconcile with a freshly fetched phase.
    ///
    /// Cold load: phase says `Checkpoint` but nothing is cached locally --
    /// fetch the task's checkpoint list and adopt the first entry. Any other
    /// phase clears the local snapshot (server state is truth).
    pub async fn sync_with_phase(&self, phase: Phase) -> Result<(), SessionError> {
        if phase != Phase::Checkpoint {
            if self.active.lock().unwrap().take().is_some() {
                debug!(task_id = %self.task_id, "phase left checkpoint, clearing local snapshot");
            }
            return Ok(());
        }
        if self.active.lock().unwrap().is_some() {
            return Ok(());
        }

        let checkpoints = self.api.list_checkpoints(&self.task_id).await?;
        match checkpoints.into_iter().next() {
            Some(checkpoint) => {
                info!(task_id = %self.task_id, step_id = %checkpoint.step_id,
                      "adopted checkpoint from cold load");
                self.adopt(checkpoint);
            }
            None => {
                // Phase says checkpoint but the list is empty: leave local
                // state unset and let the next refresh reconcile.
                debug!(task_id = %self.task_id, "checkpoint phase with empty checkpoint list");
            }
        }
        Ok(())
    }

    /// Approve the pending step. On success the active checkpoint is
    /// cleared and the caller must re-fetch the task; on failure it is left
    /// untouched so the user can retry.
    pub async fn approve(
        &self,
        step_id: &str,
        learn_preference: bool,
    ) -> Result<(), SessionError> {
        self.api
            .approve_checkpoint(&self.task_id, step_id, learn_preference)
            .await?;
        info!(task_id = %self.task_id, %step_id, "checkpoint approved");
        self.clear();
        Ok(())
    }

    /// Reject the pending step. An empty reason is refused before any
    /// network call; the success/failure contract matches `approve`.
    pub async fn reject(
        &self,
        step_id: &str,
        reason: &str,
        learn_preference: bool,
    ) -> Result<(), SessionError> {
        if reason.trim().is_empty() {
            return Err(SessionError::EmptyRejectReason);
        }
        self.api
            .reject_checkpoint(&self.task_id, step_id, reason, learn_preference)
            .await?;
        info!(task_id = %self.task_id, %step_id, "checkpoint rejected");
        self.clear();
        Ok(())
    }
}
