//! End-to-end stream consumer tests: a mock server serves the line-oriented
//! frame protocol and the consumer dispatches typed callbacks.

use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use taskdeck_client::{observe, ApiClient, ClientConfig, PlanningEvent, TaskStreamEvents};
use taskdeck_types::Checkpoint;

#[derive(Debug, Clone, PartialEq)]
enum Seen {
    Started(String),
    Completed(String),
    Failed(String),
    Checkpoint(String),
    Complete,
    Error(String),
    Planning(String),
    StreamEnd,
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Seen>>,
}

impl Recorder {
    fn snapshot(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
    fn record(&self, event: Seen) {
        self.seen.lock().unwrap().push(event);
    }
}

impl TaskStreamEvents for Recorder {
    fn on_step_started(&self, step_id: &str, _step_name: &str) {
        self.record(Seen::Started(step_id.into()));
    }
    fn on_step_completed(&self, step_id: &str, _step_name: &str, _outputs: &Map<String, Value>) {
        self.record(Seen::Completed(step_id.into()));
    }
    fn on_step_failed(&self, step_id: &str, _error: &str) {
        self.record(Seen::Failed(step_id.into()));
    }
    fn on_checkpoint(&self, checkpoint: Checkpoint) {
        self.record(Seen::Checkpoint(checkpoint.step_id));
    }
    fn on_complete(&self, _result: Option<Value>) {
        self.record(Seen::Complete);
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

fn client_for(server: &mockito::ServerGuard) -> ApiClient {
    ApiClient::new(ClientConfig::new(server.url(), "test-token")).unwrap()
}

#[tokio::test]
async fn full_stream_dispatches_in_order_and_ends() {
    let body = concat!(
        "data: {\"type\": \"connected\"}\n",
        "\n",
        "data: {\"type\": \"task.step.started\", \"stepId\": \"s1\", \"stepName\": \"fetch\"}\n",
        "data: {\"type\": \"heartbeat\"}\n",
        "data: {\"type\": \"task.step.completed\", \"stepId\": \"s1\", \"stepName\": \"fetch\", \"outputs\": {\"summary\": \"ok\"}}\n",
        "data: {\"type\": \"task.completed\"}\n",
        "data: [DONE]\n",
    );
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks/t1/stream")
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let recorder = Arc::new(Recorder::default());
    let handle = observe(&client_for(&server), "t1", recorder.clone());
    handle.join().await;

    assert_eq!(
        recorder.snapshot(),
        vec![
            Seen::Started("s1".into()),
            Seen::Completed("s1".into()),
            Seen::Complete,
            Seen::StreamEnd,
        ]
    );
}

#[tokio::test]
async fn duplicated_frames_produce_one_effect() {
    let body = concat!(
        "data: {\"type\": \"task.step.started\", \"id\": \"evt-1\", \"stepId\": \"s1\", \"stepName\": \"fetch\"}\n",
        "data: {\"type\": \"task.step.started\", \"id\": \"evt-1\", \"stepId\": \"s1\", \"stepName\": \"fetch\"}\n",
        "data: [DONE]\n",
    );
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks/t1/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let recorder = Arc::new(Recorder::default());
    observe(&client_for(&server), "t1", recorder.clone())
        .join()
        .await;

    assert_eq!(
        recorder.snapshot(),
        vec![Seen::Started("s1".into()), Seen::StreamEnd]
    );
}

#[tokio::test]
async fn terminal_notice_ends_without_other_callbacks() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks/t1/stream")
        .with_status(200)
        .with_body("data: {\"type\": \"already_terminal\"}\n")
        .create_async()
        .await;

    let recorder = Arc::new(Recorder::default());
    observe(&client_for(&server), "t1", recorder.clone())
        .join()
        .await;

    assert_eq!(recorder.snapshot(), vec![Seen::StreamEnd]);
}

#[tokio::test]
async fn refused_connection_surfaces_one_error_then_ends() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks/t1/stream")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let recorder = Arc::new(Recorder::default());
    observe(&client_for(&server), "t1", recorder.clone())
        .join()
        .await;

    let seen = recorder.snapshot();
    assert_eq!(seen.len(), 2);
    assert!(matches!(&seen[0], Seen::Error(m) if m.contains("403")));
    assert_eq!(seen[1], Seen::StreamEnd);
}

#[tokio::test]
async fn cancelled_handle_suppresses_everything() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks/t1/stream")
        .with_status(200)
        .with_body("data: {\"type\": \"task.step.started\", \"stepId\": \"s1\", \"stepName\": \"a\"}\n")
        .create_async()
        .await;

    let recorder = Arc::new(Recorder::default());
    let handle = observe(&client_for(&server), "t1", recorder.clone());
    // Cancel before the request can complete.
    handle.cancel();
    assert!(handle.is_cancelled());
    handle.join().await;

    assert!(recorder.snapshot().is_empty());
}

#[tokio::test]
async fn missing_trailing_newline_still_flushes_final_frame() {
    let body = "data: {\"type\": \"task.step.failed\", \"stepId\": \"s9\", \"error\": \"boom\"}";
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/tasks/t1/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let recorder = Arc::new(Recorder::default());
    observe(&client_for(&server), "t1", recorder.clone())
        .join()
        .await;

    assert_eq!(
        recorder.snapshot(),
        vec![Seen::Failed("s9".into()), Seen::StreamEnd]
    );
}
