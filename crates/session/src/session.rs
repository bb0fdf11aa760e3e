//! The task observation session: one per observed task id.
//!
//! Wires the phase deriver, the event stream consumer, the checkpoint
//! coordinator, the delivery classifier, and the planning tracker together.
//! The session owns two clearly separated state domains:
//!
//! - the authoritative `Task` snapshot, a read-only cache that is only ever
//!   replaced wholesale by a fresh fetch (stream data never patches it), and
//! - the session-scoped ephemeral log: activity items, deliveries, planning
//!   progress, and the active checkpoint, all discarded on `close()`.
//!
//! Every externally observed state change (stream event, mutation, stream
//! end) queues a re-synchronization with the authoritative record; a driver
//! task coalesces the queue so bursts of events cost one fetch. When a
//! stream drops while the task is still live, the driver re-opens it after
//! an exponential backoff instead of silently going deaf.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use taskdeck_client::{observe, ApiClient, PlanningEvent, StreamHandle, TaskStreamEvents};
use taskdeck_types::{
    derive_phase, ActivityItem, ActivityKind, Checkpoint, Delivery, Phase, PlanningProgress, Task,
};

use crate::checkpoint::CheckpointCoordinator;
use crate::classifier::classify_outputs;
use crate::error::SessionError;
use crate::planning::PlanningTracker;

/// Typed notifications broadcast to the presentation layer. This is the
/// explicit command channel that replaces any ad-hoc global event bus.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// The authoritative task was re-fetched; carries the derived phase.
    Task(Phase),
    Activity(ActivityItem),
    Delivery(Delivery),
    Checkpoint(Option<Checkpoint>),
    Planning(PlanningProgress),
    StreamEnded,
}

/// Why the driver should re-synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshCause {
    /// A stream event observed a state change.
    Event,
    /// The stream closed; reconnect (with backoff) if the task is still live.
    StreamEnded,
}

/// Ephemeral per-session state. Exists only while the session is open.
#[derive(Default)]
struct SessionState {
    task: Option<Task>,
    phase: Option<Phase>,
    /// Newest first.
    activity: Vec<ActivityItem>,
    deliveries: Vec<Delivery>,
    /// Step ids that already produced a delivery, so live events and the
    /// cold-load scan converge on one record per step.
    delivered_steps: HashSet<String>,
    planning: PlanningTracker,
    closed: bool,
}

struct SessionInner {
    api: Arc<ApiClient>,
    task_id: String,
    state: Mutex<SessionState>,
    checkpoints: CheckpointCoordinator,
    updates: broadcast::Sender<SessionUpdate>,
    refresh_tx: mpsc::UnboundedSender<RefreshCause>,
    stream: Mutex<Option<StreamHandle>>,
}

/// Observation session handle exposed to the presentation layer.
pub struct ObservationSession {
    inner: Arc<SessionInner>,
}

impl ObservationSession {
    /// Open a session for one task id: spawns the driver, performs the
    /// initial synchronization, and opens the event stream if the task's
    /// phase calls for one.
    pub async fn begin(
        api: Arc<ApiClient>,
        task_id: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let session = Self::detached(api, task_id);
        session.refresh().await?;
        Ok(session)
    }

    /// Build the session and spawn its driver without the initial fetch.
    fn detached(api: Arc<ApiClient>, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(256);
        let max_reconnect_delay = api.config().max_reconnect_delay;
        let inner = Arc::new(SessionInner {
            checkpoints: CheckpointCoordinator::new(api.clone(), &task_id),
            api,
            task_id,
            state: Mutex::new(SessionState::default()),
            updates,
            refresh_tx,
            stream: Mutex::new(None),
        });
        tokio::spawn(drive(inner.clone(), refresh_rx, max_reconnect_delay));
        Self { inner }
    }

    /// Re-fetch the authoritative task, replace the cached snapshot
    /// wholesale, reconcile the checkpoint coordinator, and open or close
    /// the stream to match the new phase.
    pub async fn refresh(&self) -> Result<Phase, SessionError> {
        let phase = self.inner.refresh_once().await?;
        self.inner.sync_stream(phase);
        Ok(phase)
    }

    /// Ask the service to start (or resume) execution, then re-sync.
    pub async fn start(&self) -> Result<Phase, SessionError> {
        if self.inner.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner.api.start_task(&self.inner.task_id).await?;
        self.refresh().await
    }

    /// Ask the service to pause at the next step boundary, then re-sync.
    pub async fn pause(&self) -> Result<Phase, SessionError> {
        if self.inner.is_closed() {
            return Err(SessionError::Closed);
        }
        self.inner.api.pause_task(&self.inner.task_id).await?;
        self.refresh().await
    }

    /// Approve the active checkpoint. On transport failure the checkpoint
    /// stays active; on success the authoritative task is re-fetched.
    pub async fn approve_active_checkpoint(
        &self,
        learn_preference: bool,
    ) -> Result<Phase, SessionError> {
        let step_id = self
            .inner
            .checkpoints
            .active()
            .ok_or(SessionError::NoActiveCheckpoint)?
            .step_id;
        self.inner.checkpoints.approve(&step_id, learn_preference).await?;
        let _ = self.inner.updates.send(SessionUpdate::Checkpoint(None));
        self.refresh().await
    }

    /// Reject the active checkpoint. An empty reason fails before any
    /// network call and changes nothing.
    pub async fn reject_active_checkpoint(
        &self,
        reason: &str,
        learn_preference: bool,
    ) -> Result<Phase, SessionError> {
        let step_id = self
            .inner
            .checkpoints
            .active()
            .ok_or(SessionError::NoActiveCheckpoint)?
            .step_id;
        self.inner
            .checkpoints
            .reject(&step_id, reason, learn_preference)
            .await?;
        let _ = self.inner.updates.send(SessionUpdate::Checkpoint(None));
        self.refresh().await
    }

    /// Tear the session down: cancel the stream and discard every piece of
    /// ephemeral state. The task record lives on the server; nothing here
    /// survives.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            state.task = None;
            state.phase = None;
            state.activity.clear();
            state.deliveries.clear();
            state.delivered_steps.clear();
            state.planning.reset();
        }
        if let Some(handle) = self.inner.stream.lock().unwrap().take() {
            handle.cancel();
        }
        self.inner.checkpoints.clear();
        // Wake the driver so it can observe the closed flag and exit.
        let _ = self.inner.refresh_tx.send(RefreshCause::Event);
        info!(task_id = %self.inner.task_id, "observation session closed");
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    pub fn phase(&self) -> Option<Phase> {
        self.inner.state.lock().unwrap().phase
    }

    pub fn task(&self) -> Option<Task> {
        self.inner.state.lock().unwrap().task.clone()
    }

    /// Activity log, newest first.
    pub fn activity(&self) -> Vec<ActivityItem> {
        self.inner.state.lock().unwrap().activity.clone()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.inner.state.lock().unwrap().deliveries.clone()
    }

    pub fn planning(&self) -> PlanningProgress {
        self.inner.state.lock().unwrap().planning.snapshot()
    }

    pub fn active_checkpoint(&self) -> Option<Checkpoint> {
        self.inner.checkpoints.active()
    }

    /// Subscribe to typed session updates.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }
}

/// Dropping the handle tears the session down the same way `close()` does,
/// so an abandoned session never leaves the stream pump or the driver task
/// running.
impl Drop for ObservationSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Fetch the authoritative task and apply it: wholesale snapshot
    /// replacement, cold-load delivery scan, checkpoint reconciliation.
    async fn refresh_once(&self) -> Result<Phase, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let task = self.api.get_task(&self.task_id).await?;
        let phase = derive_phase(&task);

        let new_deliveries = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(SessionError::Closed);
            }
            let mut fresh = Vec::new();
            if phase == Phase::Completed {
                // Cold load of a finished task: rebuild deliveries from the
                // steps themselves. Any non-empty outputs count, whatever
                // the step's own status; live-delivered steps are already
                // marked.
                for step in &task.steps {
                    if !step.has_outputs() {
                        continue;
                    }
                    if !state.delivered_steps.insert(step.id.clone()) {
                        continue;
                    }
                    let outputs = step.outputs.as_ref().cloned().unwrap_or_default();
                    let delivery = build_delivery(&step.id, &step.name, &outputs);
                    state.deliveries.push(delivery.clone());
                    fresh.push(delivery);
                }
            }
            state.task = Some(task);
            state.phase = Some(phase);
            fresh
        };

        self.checkpoints.sync_with_phase(phase).await?;

        for delivery in new_deliveries {
            let _ = self.updates.send(SessionUpdate::Delivery(delivery));
        }
        let _ = self.updates.send(SessionUpdate::Task(phase));
        Ok(phase)
    }

    /// Open or close the stream to match the phase. At most one channel per
    /// task id: an existing handle is cancelled before any new one opens.
    fn sync_stream(self: &Arc<Self>, phase: Phase) {
        let mut slot = self.stream.lock().unwrap();
        if phase.is_live() {
            if slot.is_none() && !self.is_closed() {
                debug!(task_id = %self.task_id, ?phase, "opening event stream");
                *slot = Some(observe(&self.api, &self.task_id, self.clone()));
            }
        } else if let Some(handle) = slot.take() {
            debug!(task_id = %self.task_id, ?phase, "phase left live set, closing stream");
            handle.cancel();
        }
    }

    fn request_refresh(&self, cause: RefreshCause) {
        let _ = self.refresh_tx.send(cause);
    }

    fn push_activity(&self, item: ActivityItem) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.activity.insert(0, item.clone());
        }
        let _ = self.updates.send(SessionUpdate::Activity(item));
    }
}

fn build_delivery(step_id: &str, step_name: &str, outputs: &Map<String, Value>) -> Delivery {
    Delivery {
        id: Delivery::id_for_step(step_id),
        step_id: step_id.to_string(),
        step_name: step_name.to_string(),
        kind: classify_outputs(outputs),
        title: step_name.to_string(),
        content: Value::Object(outputs.clone()),
        created_at: Utc::now(),
    }
}

impl TaskStreamEvents for SessionInner {
    fn on_step_started(&self, step_id: &str, step_name: &str) {
        self.push_activity(
            ActivityItem::new(ActivityKind::Started, format!("Step started: {step_name}"))
                .with_step(step_id),
        );
        self.request_refresh(RefreshCause::Event);
    }

    fn on_step_completed(&self, step_id: &str, step_name: &str, outputs: &Map<String, Value>) {
        self.push_activity(
            ActivityItem::new(ActivityKind::Completed, format!("Step completed: {step_name}"))
                .with_step(step_id),
        );
        if !outputs.is_empty() {
            let delivery = {
                let mut state = self.state.lock().unwrap();
                if state.closed || !state.delivered_steps.insert(step_id.to_string()) {
                    None
                } else {
                    let delivery = build_delivery(step_id, step_name, outputs);
                    state.deliveries.push(delivery.clone());
                    Some(delivery)
                }
            };
            if let Some(delivery) = delivery {
                let _ = self.updates.send(SessionUpdate::Delivery(delivery));
            }
        }
        self.request_refresh(RefreshCause::Event);
    }

    fn on_step_failed(&self, step_id: &str, error: &str) {
        self.push_activity(
            ActivityItem::new(ActivityKind::Error, format!("Step failed: {error}"))
                .with_step(step_id),
        );
        self.request_refresh(RefreshCause::Event);
    }

    fn on_checkpoint(&self, checkpoint: Checkpoint) {
        self.push_activity(
            ActivityItem::new(
                ActivityKind::Decision,
                format!("Checkpoint awaiting review: {}", checkpoint.name),
            )
            .with_step(&checkpoint.step_id),
        );
        self.checkpoints.adopt(checkpoint.clone());
        let _ = self.updates.send(SessionUpdate::Checkpoint(Some(checkpoint)));
        self.request_refresh(RefreshCause::Event);
    }

    fn on_complete(&self, _result: Option<Value>) {
        // The completion itself is reflected by the re-fetched phase; the
        // step-level activity log already tells the story.
        self.request_refresh(RefreshCause::Event);
    }

    fn on_error(&self, message: &str) {
        self.push_activity(ActivityItem::new(ActivityKind::Error, message));
        self.request_refresh(RefreshCause::Event);
    }

    fn on_planning(&self, event: PlanningEvent) {
        let (snapshot, message) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.planning.fold(&event);
            (
                state.planning.snapshot(),
                event.data.get("message").and_then(Value::as_str).map(String::from),
            )
        };
        if let Some(message) = message {
            self.push_activity(ActivityItem::new(ActivityKind::Progress, message));
        }
        let _ = self.updates.send(SessionUpdate::Planning(snapshot));
    }

    fn on_stream_end(&self) {
        // Drop the finished handle so the next refresh may open a new one.
        self.stream.lock().unwrap().take();
        let _ = self.updates.send(SessionUpdate::StreamEnded);
        self.request_refresh(RefreshCause::StreamEnded);
    }
}

/// Driver: serializes re-synchronization requests, coalescing bursts into a
/// single fetch, and paces stream re-opens with an exponential backoff.
async fn drive(
    inner: Arc<SessionInner>,
    mut refresh_rx: mpsc::UnboundedReceiver<RefreshCause>,
    max_reconnect_delay: Duration,
) {
    let mut backoff = Duration::from_secs(1);

    while let Some(first) = refresh_rx.recv().await {
        let mut cause = first;
        while let Ok(next) = refresh_rx.try_recv() {
            if next == RefreshCause::StreamEnded {
                cause = RefreshCause::StreamEnded;
            }
        }
        if inner.is_closed() {
            break;
        }

        match inner.refresh_once().await {
            Ok(phase) => {
                if cause == RefreshCause::StreamEnded && phase.is_live() {
                    // The stream dropped but the task is not done: resume
                    // observation after a pause rather than hammering the
                    // service or going silent.
                    debug!(task_id = %inner.task_id, delay = ?backoff, "stream dropped, will resume");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_reconnect_delay);
                } else {
                    backoff = Duration::from_secs(1);
                }
                if inner.is_closed() {
                    break;
                }
                inner.sync_stream(phase);
            }
            Err(SessionError::Closed) => break,
            Err(e) => {
                warn!(task_id = %inner.task_id, error = %e, "background refresh failed");
            }
        }
    }
    debug!(task_id = %inner.task_id, "session driver stopped");
}
