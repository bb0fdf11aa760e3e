//! REST client for the delegation service.
//!
//! Every operation is a single request with a single response: no client-side
//! queuing, coalescing, or automatic retry. Non-2xx responses become
//! [`ApiError::Status`] with the body text attached for display.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use taskdeck_types::{Checkpoint, Task};

use crate::config::ClientConfig;
use crate::error::ApiError;

/// HTTP client for task and checkpoint operations, authenticated with the
/// caller's bearer credential.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    /// Separate client without a request timeout: the event stream stays
    /// open until cancelled or closed by the server.
    stream_http: reqwest::Client,
    config: ClientConfig,
}

#[derive(Deserialize)]
struct TaskEnvelope {
    task: Task,
}

#[derive(Deserialize)]
struct CheckpointListEnvelope {
    checkpoints: Vec<Checkpoint>,
}

#[derive(Deserialize)]
struct CheckpointEnvelope {
    checkpoint: Checkpoint,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::transport(config.base_url.clone(), e))?;
        let stream_http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::transport(config.base_url.clone(), e))?;
        Ok(Self {
            http,
            stream_http,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// GET /api/tasks/:id -- the authoritative task record, fetched fresh.
    pub async fn get_task(&self, task_id: &str) -> Result<Task, ApiError> {
        let envelope: TaskEnvelope = self.get_json(&format!("/api/tasks/{task_id}")).await?;
        Ok(envelope.task)
    }

    /// GET /api/tasks/:id/checkpoints -- ordered list, oldest first.
    pub async fn list_checkpoints(&self, task_id: &str) -> Result<Vec<Checkpoint>, ApiError> {
        let envelope: CheckpointListEnvelope = self
            .get_json(&format!("/api/tasks/{task_id}/checkpoints"))
            .await?;
        Ok(envelope.checkpoints)
    }

    /// POST approve-checkpoint. Returns the updated checkpoint; the task
    /// itself must be re-fetched by the caller.
    pub async fn approve_checkpoint(
        &self,
        task_id: &str,
        step_id: &str,
        learn_preference: bool,
    ) -> Result<Checkpoint, ApiError> {
        let path = format!("/api/tasks/{task_id}/checkpoints/{step_id}/approve");
        let body = serde_json::json!({ "learnPreference": learn_preference });
        let envelope: CheckpointEnvelope = self.post_json(&path, &body).await?;
        Ok(envelope.checkpoint)
    }

    /// POST reject-checkpoint. The non-empty-reason rule is enforced by the
    /// checkpoint coordinator before this is ever called.
    pub async fn reject_checkpoint(
        &self,
        task_id: &str,
        step_id: &str,
        reason: &str,
        learn_preference: bool,
    ) -> Result<Checkpoint, ApiError> {
        let path = format!("/api/tasks/{task_id}/checkpoints/{step_id}/reject");
        let body = serde_json::json!({
            "reason": reason,
            "learnPreference": learn_preference,
        });
        let envelope: CheckpointEnvelope = self.post_json(&path, &body).await?;
        Ok(envelope.checkpoint)
    }

    /// POST /api/tasks/:id/start -- begin (or resume) execution.
    pub async fn start_task(&self, task_id: &str) -> Result<(), ApiError> {
        self.post_no_content(&format!("/api/tasks/{task_id}/start")).await
    }

    /// POST /api/tasks/:id/pause -- request a pause at the next step boundary.
    pub async fn pause_task(&self, task_id: &str) -> Result<(), ApiError> {
        self.post_no_content(&format!("/api/tasks/{task_id}/pause")).await
    }

    /// The per-task streaming endpoint consumed by [`crate::stream::observe`].
    pub(crate) fn stream_url(&self, task_id: &str) -> String {
        format!("{}/api/tasks/{task_id}/stream", self.config.base_url)
    }

    pub(crate) fn stream_http(&self) -> &reqwest::Client {
        &self.stream_http
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.config.base_url);
        debug!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(|e| ApiError::transport(path, e))?;
        Self::decode(path, resp).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.config.base_url);
        debug!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.bearer_token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::transport(path, e))?;
        Self::decode(path, resp).await
    }

    /// POST where only the status matters; any response body is ignored.
    async fn post_no_content(&self, path: &str) -> Result<(), ApiError> {
        let url = format!("{}{path}", self.config.base_url);
        debug!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.bearer_token)
            .send()
            .await
            .map_err(|e| ApiError::transport(path, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::status(path, status, body));
        }
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::status(path, status, body));
        }
        resp.json::<T>().await.map_err(|e| ApiError::decode(path, e))
    }
}
