//! Long-lived, one-directional event stream consumer.
//!
//! `observe` opens exactly one network channel for one task id and pumps its
//! line-oriented body through the frame router until the server closes the
//! connection, a sentinel or terminal notice arrives, or the caller cancels
//! the returned handle. Partial chunks are buffered until a full line is
//! available; a malformed payload is logged and skipped, never fatal.
//!
//! Cancellation is explicit and idempotent: after `StreamHandle::cancel()`
//! no further callback fires, including for frames already decoded, and the
//! cancel itself never surfaces as `on_error`.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taskdeck_types::Checkpoint;

use crate::api::ApiClient;
use crate::dedup::DedupCache;
use crate::protocol::{parse_frame, PlanningEvent, StreamFrame, DATA_PREFIX, STREAM_SENTINEL};

/// Typed callbacks dispatched by the consumer. One implementor per
/// observation session; methods are synchronous and must not block.
pub trait TaskStreamEvents: Send + Sync + 'static {
    fn on_step_started(&self, step_id: &str, step_name: &str);
    fn on_step_completed(&self, step_id: &str, step_name: &str, outputs: &Map<String, Value>);
    fn on_step_failed(&self, step_id: &str, error: &str);
    fn on_checkpoint(&self, checkpoint: Checkpoint);
    fn on_complete(&self, result: Option<Value>);
    fn on_error(&self, message: &str);
    fn on_planning(&self, event: PlanningEvent);
    fn on_stream_end(&self);
}

/// Cancellation handle for one `observe` call. The only way to stop the
/// stream from the client side; there is no implicit timeout.
#[derive(Debug)]
pub struct StreamHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl StreamHandle {
    /// Idempotent: calling twice is the same as calling once.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the pump task to finish (after cancel or natural close).
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Open the per-task event channel and dispatch frames to `handler` until
/// the stream ends or the handle is cancelled.
pub fn observe<H: TaskStreamEvents>(
    client: &ApiClient,
    task_id: &str,
    handler: Arc<H>,
) -> StreamHandle {
    let token = CancellationToken::new();
    let url = client.stream_url(task_id);
    let bearer = client.config().bearer_token.clone();
    // Untimed client: the stream stays open until cancelled or closed by
    // the server.
    let http = client.stream_http().clone();

    let join = tokio::spawn(pump(
        http,
        url,
        bearer,
        task_id.to_string(),
        handler,
        token.clone(),
    ));

    StreamHandle { token, join }
}

async fn pump<H: TaskStreamEvents>(
    http: reqwest::Client,
    url: String,
    bearer: String,
    task_id: String,
    handler: Arc<H>,
    token: CancellationToken,
) {
    let mut router = FrameRouter::new(task_id.clone(), handler, token.clone());

    let resp = tokio::select! {
        _ = token.cancelled() => return,
        resp = http.get(&url).bearer_auth(&bearer).send() => resp,
    };

    let resp = match resp {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            let status = r.status();
            let body = r.text().await.unwrap_or_default();
            warn!(%task_id, %status, "stream endpoint refused connection");
            router.transport_error(&format!("stream returned {status}: {body}"));
            return;
        }
        Err(e) => {
            warn!(%task_id, error = %e, "stream connect failed");
            router.transport_error(&format!("stream connect failed: {e}"));
            return;
        }
    };

    debug!(%task_id, "event stream open");

    let mut body = resp.bytes_stream();
    let mut buffer = LineBuffer::default();

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(%task_id, "stream cancelled");
                return;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for line in buffer.push(&bytes) {
                        if router.handle_line(&line) == Routed::Stop {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(%task_id, error = %e, "stream read error");
                    router.finish(buffer.take_remainder());
                    return;
                }
                None => {
                    debug!(%task_id, "stream closed by server");
                    router.finish(buffer.take_remainder());
                    return;
                }
            }
        }
    }
}

/// Whether the pump should keep reading after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routed {
    Continue,
    Stop,
}

/// Routes decoded lines to callbacks: framing check, de-duplication,
/// cancellation gate, dispatch. Owns the per-connection de-dup cache, so
/// closing the channel discards the seen set with it.
struct FrameRouter<H> {
    task_id: String,
    handler: Arc<H>,
    token: CancellationToken,
    dedup: DedupCache,
    ended: bool,
}

impl<H: TaskStreamEvents> FrameRouter<H> {
    fn new(task_id: String, handler: Arc<H>, token: CancellationToken) -> Self {
        Self {
            task_id,
            handler,
            token,
            dedup: DedupCache::default(),
            ended: false,
        }
    }

    /// Handle one complete line. Blank lines are ignored; anything without
    /// the `data:` prefix is logged and skipped.
    fn handle_line(&mut self, line: &str) -> Routed {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return Routed::Continue;
        }
        // Cancellation suppresses frames already decoded but not dispatched.
        if self.token.is_cancelled() {
            return Routed::Stop;
        }

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            debug!(task_id = %self.task_id, %line, "non-data line, skipping");
            return Routed::Continue;
        };
        let payload = payload.trim_start();

        if payload == STREAM_SENTINEL {
            debug!(task_id = %self.task_id, "stream sentinel received");
            self.end_stream();
            return Routed::Stop;
        }

        let parsed = match parse_frame(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "malformed frame, skipping");
                return Routed::Continue;
            }
        };

        if let Some(ref key) = parsed.dedup_key {
            if !self.dedup.insert(key) {
                debug!(task_id = %self.task_id, %key, "duplicate frame dropped");
                return Routed::Continue;
            }
        }

        self.dispatch(parsed.frame)
    }

    fn dispatch(&mut self, frame: StreamFrame) -> Routed {
        match frame {
            StreamFrame::Connected => {
                debug!(task_id = %self.task_id, "stream connected");
            }
            StreamFrame::StepStarted { step_id, step_name } => {
                self.handler.on_step_started(&step_id, &step_name);
            }
            StreamFrame::StepCompleted {
                step_id,
                step_name,
                outputs,
            } => {
                self.handler.on_step_completed(&step_id, &step_name, &outputs);
            }
            StreamFrame::StepFailed { step_id, error } => {
                self.handler.on_step_failed(&step_id, &error);
            }
            StreamFrame::CheckpointCreated(checkpoint) => {
                self.handler.on_checkpoint(*checkpoint);
            }
            StreamFrame::CheckpointAutoApproved { step_id } => {
                debug!(task_id = %self.task_id, %step_id, "checkpoint auto-approved");
            }
            StreamFrame::TaskCompleted { result } => {
                self.handler.on_complete(result);
            }
            StreamFrame::TaskFailed { error } => {
                self.handler.on_error(&error);
            }
            StreamFrame::Heartbeat => {}
            StreamFrame::AlreadyTerminal => {
                debug!(task_id = %self.task_id, "task already terminal, ending stream");
                self.end_stream();
                return Routed::Stop;
            }
            StreamFrame::Planning(event) => {
                self.handler.on_planning(event);
            }
            StreamFrame::Unhandled(frame_type) => {
                debug!(task_id = %self.task_id, %frame_type, "unhandled frame type");
            }
        }
        Routed::Continue
    }

    /// Natural close: flush any buffered partial line as a best-effort final
    /// frame, then signal stream end.
    fn finish(&mut self, remainder: Option<String>) {
        if let Some(line) = remainder {
            let _ = self.handle_line(&line);
        }
        self.end_stream();
    }

    /// A transport failure is surfaced as a message, then the stream ends.
    /// Suppressed entirely after cancellation.
    fn transport_error(&mut self, message: &str) {
        if self.token.is_cancelled() {
            return;
        }
        self.handler.on_error(message);
        self.end_stream();
    }

    fn end_stream(&mut self) {
        if self.ended || self.token.is_cancelled() {
            return;
        }
        self.ended = true;
        self.dedup.clear();
        self.handler.on_stream_end();
    }
}

/// Accumulates raw network chunks and yields only complete lines; the
/// trailing partial line stays buffered until the next chunk or close.
///
/// Buffers bytes, not text: a multi-byte character split across a chunk
/// boundary must survive intact, so decoding happens per complete line.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            Some(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Started(String, String),
        Completed(String, String, Map<String, Value>),
        Failed(String, String),
        Checkpoint(String),
        Complete(Option<Value>),
        Error(String),
        Planning(String),
        StreamEnd,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Seen>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Seen> {
            std::mem::take(&mut self.seen.lock().unwrap())
        }
        fn record(&self, event: Seen) {
            self.seen.lock().unwrap().push(event);
        }
    }

    impl TaskStreamEvents for Recorder {
        fn on_step_started(&self, step_id: &str, step_name: &str) {
            self.record(Seen::Started(step_id.into(), step_name.into()));
        }
        fn on_step_completed(&self, step_id: &str, step_name: &str, outputs: &Map<String, Value>) {
            self.record(Seen::Completed(step_id.into(), step_name.into(), outputs.clone()));
        }
        fn on_step_failed(&self, step_id: &str, error: &str) {
            self.record(Seen::Failed(step_id.into(), error.into()));
        }
        fn on_checkpoint(&self, checkpoint: Checkpoint) {
            self.record(Seen::Checkpoint(checkpoint.step_id));
        }
        fn on_complete(&self, result: Option<Value>) {
            self.record(Seen::Complete(result));
        }
        fn on_error(&self, message: &str) {
            self.record(Seen::Error(message.into()));
        }
        fn on_planning(&self, event: PlanningEvent) {
            self.record(Seen::Planning(event.event_type));
        }
        fn on_stream_end(&self) {
            self.record(Seen::StreamEnd);
        }
    }

    fn make_router(recorder: &Arc<Recorder>) -> (FrameRouter<Recorder>, CancellationToken) {
        let token = CancellationToken::new();
        (
            FrameRouter::new("t1".into(), recorder.clone(), token.clone()),
            token,
        )
    }

    #[test]
    fn routes_the_basic_scenario() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        router.handle_line(r#"data: {"type": "connected"}"#);
        router.handle_line(
            r#"data: {"type": "task.step.started", "stepId": "s1", "stepName": "fetch"}"#,
        );
        router.handle_line(
            r#"data: {"type": "task.step.completed", "stepId": "s1", "stepName": "fetch", "outputs": {"summary": "ok"}}"#,
        );
        router.handle_line(r#"data: {"type": "heartbeat"}"#);
        router.handle_line(r#"data: {"type": "task.completed"}"#);
        router.finish(None);

        let seen = recorder.take();
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[0], Seen::Started(..)));
        assert!(matches!(seen[1], Seen::Completed(..)));
        assert!(matches!(seen[2], Seen::Complete(None)));
        assert_eq!(seen[3], Seen::StreamEnd);
    }

    #[test]
    fn duplicate_frames_dispatch_once() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        let line = r#"data: {"type": "task.step.started", "id": "evt-1", "stepId": "s1", "stepName": "fetch"}"#;
        router.handle_line(line);
        router.handle_line(line);
        router.handle_line(line);

        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn composite_key_dedups_without_explicit_id() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        let line = r#"data: {"type": "task.step.failed", "stepId": "s2", "error": "timeout", "timestamp": "2026-08-01T10:00:00Z"}"#;
        router.handle_line(line);
        router.handle_line(line);

        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn cancellation_suppresses_already_decoded_frames() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, token) = make_router(&recorder);

        router.handle_line(
            r#"data: {"type": "task.step.started", "stepId": "s1", "stepName": "a"}"#,
        );
        token.cancel();
        let routed = router.handle_line(
            r#"data: {"type": "task.step.started", "stepId": "s2", "stepName": "b"}"#,
        );
        assert_eq!(routed, Routed::Stop);
        router.finish(None);

        // Only the pre-cancel frame; no stream-end, no error.
        let seen = recorder.take();
        assert_eq!(seen, vec![Seen::Started("s1".into(), "a".into())]);
    }

    #[test]
    fn cancelled_transport_error_raises_nothing() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, token) = make_router(&recorder);
        token.cancel();
        router.transport_error("connection reset");
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn malformed_payload_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        assert_eq!(router.handle_line("data: {broken"), Routed::Continue);
        router.handle_line(
            r#"data: {"type": "task.step.started", "stepId": "s1", "stepName": "a"}"#,
        );
        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn sentinel_ends_the_stream_once() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        assert_eq!(router.handle_line("data: [DONE]"), Routed::Stop);
        // finish after sentinel must not fire a second stream-end
        router.finish(None);
        assert_eq!(recorder.take(), vec![Seen::StreamEnd]);
    }

    #[test]
    fn terminal_notice_ends_the_stream() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        assert_eq!(
            router.handle_line(r#"data: {"type": "already_terminal"}"#),
            Routed::Stop
        );
        assert_eq!(recorder.take(), vec![Seen::StreamEnd]);
    }

    #[test]
    fn flushes_partial_final_line_on_natural_close() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);
        let mut buffer = LineBuffer::default();

        // Chunk ends mid-line: nothing complete yet.
        let lines = buffer.push(
            br#"data: {"type": "task.step.started", "stepId": "s1", "#,
        );
        assert!(lines.is_empty());
        let lines = buffer.push(br#""stepName": "fetch"}"#);
        assert!(lines.is_empty());

        router.finish(buffer.take_remainder());

        let seen = recorder.take();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], Seen::Started(..)));
        assert_eq!(seen[1], Seen::StreamEnd);
    }

    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: one").is_empty());
        assert_eq!(buffer.push(b"23\ndata: next\npart"), vec![
            "data: one23".to_string(),
            "data: next".to_string(),
        ]);
        assert_eq!(buffer.take_remainder().as_deref(), Some("part"));
        assert_eq!(buffer.take_remainder(), None);
    }

    #[test]
    fn multibyte_character_split_across_chunks_survives() {
        let line = "data: {\"type\": \"task.step.started\", \"stepId\": \"s1\", \"stepName\": \"résumé\"}\n";
        let bytes = line.as_bytes();
        // Split one byte into the two-byte encoding of the first 'é'.
        let cut = line.find('é').unwrap() + 1;

        let mut buffer = LineBuffer::default();
        assert!(buffer.push(&bytes[..cut]).is_empty());
        let lines = buffer.push(&bytes[cut..]);
        assert_eq!(lines, vec![line.trim_end_matches('\n').to_string()]);

        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);
        router.handle_line(&lines[0]);
        assert_eq!(
            recorder.take(),
            vec![Seen::Started("s1".into(), "résumé".into())]
        );
    }

    #[test]
    fn successive_planning_frames_all_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        for p in [10, 50, 90] {
            router.handle_line(&format!(
                r#"data: {{"type": "task.planning.outline", "data": {{"progress": {p}}}}}"#
            ));
        }
        assert_eq!(recorder.take().len(), 3);
    }

    #[test]
    fn blank_and_crlf_lines_are_ignored() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        router.handle_line("");
        router.handle_line("\r");
        router.handle_line(
            "data: {\"type\": \"task.step.started\", \"stepId\": \"s1\", \"stepName\": \"a\"}\r",
        );
        assert_eq!(recorder.take().len(), 1);
    }

    #[test]
    fn planning_frames_reach_the_planning_callback() {
        let recorder = Arc::new(Recorder::default());
        let (mut router, _token) = make_router(&recorder);

        router.handle_line(
            r#"data: {"type": "task.planning.outline", "data": {"progress": 10}}"#,
        );
        assert_eq!(
            recorder.take(),
            vec![Seen::Planning("task.planning.outline".into())]
        );
    }
}
