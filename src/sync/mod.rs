//! Keeps the engine's loaded list in step with the server's play queue.

pub mod mirror;
pub mod reconcile;
pub mod synchronizer;

pub use mirror::PlaybackMirror;
pub use synchronizer::{PreviousOutcome, QueueEvent, QueueSynchronizer, SyncPhase};
