//! Application layer for MARKS.
//!
//! Coordinates the identity session, the remote bookmark collection and its
//! change feed to keep a local replica of the signed-in owner's bookmarks.

pub mod feed_subscriber;
pub mod replica_cache;
pub mod session_store;
pub mod sync;

pub use feed_subscriber::{ChangeFeedSubscriber, FeedSignal};
pub use replica_cache::ReplicaCache;
pub use session_store::{SessionStatus, SessionStore};
pub use sync::{DiscardReason, ReconcileOutcome, SyncController, SyncEvent, SyncState, SyncView};
