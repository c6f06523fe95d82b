use marks_core::bookmark::Bookmark;
use marks_core::error::MarksError;
use serde::Serialize;

/// Session-derived state of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    /// Waiting for the startup session lookup
    Authenticating,
    Unauthenticated,
    Authenticated { owner_id: String },
}

impl SyncState {
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            SyncState::Authenticated { owner_id } => Some(owner_id),
            _ => None,
        }
    }

    /// Returns true if authenticated as exactly `owner_id`.
    pub fn is_authenticated_as(&self, owner_id: &str) -> bool {
        self.owner_id() == Some(owner_id)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, SyncState::Authenticating)
    }
}

/// Why a finished reconciliation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The session ended or changed owner while the listing was in flight
    SessionChanged,
    /// A reconciliation that started later was applied first
    Superseded,
}

/// Result of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The cache now holds the listing
    Applied { count: usize },
    Discarded(DiscardReason),
    /// Not authenticated; nothing was fetched
    Skipped,
}

/// Notifications published by the controller.
///
/// Renderers use these for transient UI (error banners, toasts); the data
/// itself is always read through [`SyncView`].
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StateChanged(SyncState),
    Reconciled { owner_id: String, count: usize },
    ReconcileDiscarded { owner_id: String, reason: DiscardReason },
    ReconcileFailed { owner_id: String, error: MarksError },
    Inserted(Bookmark),
    InsertFailed(MarksError),
    Deleted { id: String },
    DeleteFailed { id: String, error: MarksError },
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncView {
    pub state: SyncState,
    pub records: Vec<Bookmark>,
}

impl SyncView {
    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn is_signed_in(&self) -> bool {
        self.state.owner_id().is_some()
    }
}
