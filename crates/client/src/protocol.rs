//! Wire protocol for the per-task event stream.
//!
//! The stream body is line-oriented: each non-blank line is `data: <json>`,
//! and the decoded JSON carries a `type` discriminator. A literal `[DONE]`
//! payload ends the stream explicitly.
//!
//! | type                           | becomes                       |
//! |--------------------------------|-------------------------------|
//! | `connected`                    | `Connected` (logged only)     |
//! | `task.step.started`            | `StepStarted`                 |
//! | `task.step.completed`          | `StepCompleted`               |
//! | `task.step.failed`             | `StepFailed`                  |
//! | `task.checkpoint.created`      | `CheckpointCreated`           |
//! | `task.checkpoint.auto_approved`| `CheckpointAutoApproved`      |
//! | `task.completed`               | `TaskCompleted`               |
//! | `task.failed`                  | `TaskFailed`                  |
//! | `heartbeat`                    | `Heartbeat` (liveness only)   |
//! | `task_status_update` /         | `AlreadyTerminal` -- the task |
//! | `already_terminal` /           | changed state before the      |
//! | `plan_status_update`           | channel opened                |
//! | `task.planning.*` (prefix)     | `Planning`                    |
//! | anything else                  | `Unhandled` (logged, dropped) |

use serde_json::{Map, Value};

use taskdeck_types::Checkpoint;

/// Literal sentinel payload that terminates the stream.
pub const STREAM_SENTINEL: &str = "[DONE]";

/// Prefix of every non-blank frame line.
pub const DATA_PREFIX: &str = "data:";

const PLANNING_PREFIX: &str = "task.planning.";

/// A planning sub-event, forwarded whole: the tracker folds its `data`
/// payload, the type suffix doubles as a stage label fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningEvent {
    /// The full discriminator, e.g. `task.planning.outline`.
    pub event_type: String,
    pub task_id: Option<String>,
    pub data: Value,
}

impl PlanningEvent {
    /// The part after `task.planning.`, used as a stage label when the
    /// payload carries none.
    pub fn stage_suffix(&self) -> &str {
        self.event_type
            .strip_prefix(PLANNING_PREFIX)
            .unwrap_or(&self.event_type)
    }
}

/// One decoded stream frame, routed by its `type` discriminator.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Connected,
    StepStarted {
        step_id: String,
        step_name: String,
    },
    StepCompleted {
        step_id: String,
        step_name: String,
        outputs: Map<String, Value>,
    },
    StepFailed {
        step_id: String,
        error: String,
    },
    CheckpointCreated(Box<Checkpoint>),
    CheckpointAutoApproved {
        step_id: String,
    },
    TaskCompleted {
        result: Option<Value>,
    },
    TaskFailed {
        error: String,
    },
    Heartbeat,
    /// The task reached a terminal or externally-changed state before this
    /// channel opened; observation should end and re-sync.
    AlreadyTerminal,
    Planning(PlanningEvent),
    Unhandled(String),
}

/// A frame plus the stable key used for de-duplication. Frames that carry no
/// user-visible effect (connected, heartbeat, stream-level notices) have no
/// key and are never deduplicated.
#[derive(Debug)]
pub struct ParsedFrame {
    pub frame: StreamFrame,
    pub dedup_key: Option<String>,
}

/// Parse one decoded JSON payload into a routed frame.
///
/// Missing fields degrade to empty strings rather than failing the frame:
/// a partially-populated event still produces its activity line.
pub fn parse_frame(payload: &str) -> Result<ParsedFrame, serde_json::Error> {
    let value: Value = serde_json::from_str(payload)?;
    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let frame = match frame_type.as_str() {
        "connected" => StreamFrame::Connected,
        "task.step.started" => StreamFrame::StepStarted {
            step_id: str_field(&value, "stepId"),
            step_name: str_field(&value, "stepName"),
        },
        "task.step.completed" => StreamFrame::StepCompleted {
            step_id: str_field(&value, "stepId"),
            step_name: str_field(&value, "stepName"),
            outputs: value
                .get("outputs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        },
        "task.step.failed" => StreamFrame::StepFailed {
            step_id: str_field(&value, "stepId"),
            error: str_field(&value, "error"),
        },
        "task.checkpoint.created" => match value
            .get("checkpoint")
            .cloned()
            .map(serde_json::from_value::<Checkpoint>)
        {
            Some(Ok(checkpoint)) => StreamFrame::CheckpointCreated(Box::new(checkpoint)),
            _ => StreamFrame::Unhandled(frame_type.clone()),
        },
        "task.checkpoint.auto_approved" => StreamFrame::CheckpointAutoApproved {
            step_id: str_field(&value, "stepId"),
        },
        "task.completed" => StreamFrame::TaskCompleted {
            result: value.get("result").cloned().filter(|v| !v.is_null()),
        },
        "task.failed" => StreamFrame::TaskFailed {
            error: str_field(&value, "error"),
        },
        "heartbeat" => StreamFrame::Heartbeat,
        "task_status_update" | "already_terminal" | "plan_status_update" => {
            StreamFrame::AlreadyTerminal
        }
        t if t.starts_with(PLANNING_PREFIX) => StreamFrame::Planning(PlanningEvent {
            event_type: frame_type.clone(),
            task_id: value.get("taskId").and_then(Value::as_str).map(String::from),
            data: value.get("data").cloned().unwrap_or(Value::Null),
        }),
        _ => StreamFrame::Unhandled(frame_type.clone()),
    };

    let dedup_key = dedup_key(&frame_type, &frame, &value);
    Ok(ParsedFrame { frame, dedup_key })
}

/// Stable de-dup key for an effectful frame: the explicit `id` field when
/// present, otherwise a deterministic composite of the discriminator, the
/// correlating field, and the timestamp.
fn dedup_key(frame_type: &str, frame: &StreamFrame, value: &Value) -> Option<String> {
    let effectful = matches!(
        frame,
        StreamFrame::StepStarted { .. }
            | StreamFrame::StepCompleted { .. }
            | StreamFrame::StepFailed { .. }
            | StreamFrame::CheckpointCreated(_)
            | StreamFrame::TaskCompleted { .. }
            | StreamFrame::TaskFailed { .. }
            | StreamFrame::Planning(_)
    );
    if !effectful {
        return None;
    }

    if let Some(id) = value.get("id").and_then(Value::as_str) {
        return Some(id.to_string());
    }

    // Planning payloads carry their distinguishing fields inside `data`, so
    // the serialized payload is the correlator: successive progress frames
    // stay distinct, a re-delivered frame keys identically.
    if let StreamFrame::Planning(event) = frame {
        return Some(format!("{frame_type}|{}", event.data));
    }

    let correlator = value
        .get("stepId")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .or_else(|| value.get("error").and_then(Value::as_str))
        .unwrap_or("");
    let timestamp = value.get("timestamp").and_then(Value::as_str).unwrap_or("");
    Some(format!("{frame_type}|{correlator}|{timestamp}"))
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
