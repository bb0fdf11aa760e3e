//! Task observation sessions.
//!
//! This crate composes the wire layer into the surface the presentation
//! layer consumes: one [`ObservationSession`] per observed task id, holding
//! the authoritative task snapshot (replaced wholesale on every refresh)
//! beside the session-scoped ephemeral state -- activity log, deliveries,
//! planning progress, and the active checkpoint.

pub mod checkpoint;
pub mod classifier;
pub mod error;
pub mod planning;
pub mod session;

pub use checkpoint::CheckpointCoordinator;
pub use classifier::classify_outputs;
pub use error::SessionError;
pub use planning::PlanningTracker;
pub use session::{ObservationSession, SessionUpdate};
