use thiserror::Error;

use taskdeck_client::ApiError;

/// Errors surfaced across the session boundary. Validation failures are
/// caught before any network call; everything else wraps the API error so
/// the presentation layer can render one message.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("rejection requires a non-empty reason")]
    EmptyRejectReason,

    #[error("no checkpoint is awaiting a decision")]
    NoActiveCheckpoint,

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Api(#[from] ApiError),
}
