//! Shared data model for the task-delegation dashboard: wire types for
//! tasks, steps, and checkpoints, the client-local ephemeral records, and
//! the pure task-phase derivation.

pub mod activity;
pub mod checkpoint;
pub mod phase;
pub mod task;

pub use activity::*;
pub use checkpoint::*;
pub use phase::*;
pub use task::*;
