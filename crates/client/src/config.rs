//! Client configuration. Constructor-injected by the embedding application;
//! the library reads no environment variables itself.

use std::time::Duration;

/// Configuration for [`crate::ApiClient`] and the channels built on it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the delegation service, without a trailing slash
    /// (e.g. `https://api.example.com`).
    pub base_url: String,
    /// Bearer credential sent on every request, including the stream.
    pub bearer_token: String,
    /// Timeout applied to REST calls. The event stream is exempt: it stays
    /// open until cancelled or closed by the server.
    pub request_timeout: Duration,
    /// Ping interval for the conversational WebSocket channel.
    pub heartbeat_interval: Duration,
    /// Cap for the session's reconnect backoff after a stream drop.
    pub max_reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            bearer_token: String::new(),
            request_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}
