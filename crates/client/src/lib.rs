//! Remote-service contract for the task-delegation dashboard.
//!
//! This crate owns everything that touches the wire: the REST client for
//! task and checkpoint operations, the long-lived per-task event stream
//! consumer, the bounded de-duplication cache both channels share, and the
//! secondary conversational WebSocket channel.

pub mod api;
pub mod chat;
pub mod config;
pub mod dedup;
pub mod error;
pub mod protocol;
pub mod stream;

pub use api::ApiClient;
pub use chat::{ChatChannel, ChatMessage};
pub use config::ClientConfig;
pub use dedup::DedupCache;
pub use error::{ApiError, ChatError};
pub use protocol::{PlanningEvent, StreamFrame};
pub use stream::{observe, StreamHandle, TaskStreamEvents};
