//! Sync engine.
//!
//! The controller follows session transitions, owns the replica cache and
//! decides when to reconcile against the remote store.

mod controller;
mod state;

pub use controller::SyncController;
pub use state::{DiscardReason, ReconcileOutcome, SyncEvent, SyncState, SyncView};
