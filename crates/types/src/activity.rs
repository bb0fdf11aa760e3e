//! Client-local ephemeral records derived from the event stream.
//!
//! Nothing in this module is ever persisted or sent back to the service.
//! Activity items, deliveries, and planning progress exist only for the
//! lifetime of one observation session and are discarded on teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of thing an activity item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Started,
    Progress,
    Completed,
    Error,
    Decision,
}

/// One line of the session's activity log. Synthesized on the client from
/// stream events; accumulated newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    /// Synthetic id, unique within the session.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ActivityItem {
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            step_id: None,
            details: None,
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// How a step's output payload should be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    File,
    Image,
    Notification,
    Text,
}

/// A classified, user-facing representation of a step's output.
///
/// Keyed by step id: a step produces at most one delivery per session,
/// whether it arrives live or from a cold-load scan of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: String,
    pub step_id: String,
    pub step_name: String,
    pub kind: DeliveryKind,
    pub title: String,
    /// The raw output payload, untouched.
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// Stable id for a step's delivery, so duplicate stream events and the
    /// cold-load scan converge on the same record.
    pub fn id_for_step(step_id: &str) -> String {
        format!("delivery-{step_id}")
    }
}

/// Snapshot of planning-phase progress. Rebuilt per observation session;
/// the percent is monotonic within one planning run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningProgress {
    pub stage: String,
    pub percent: f64,
    pub message: String,
}
