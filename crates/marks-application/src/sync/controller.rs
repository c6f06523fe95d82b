use super::state::{DiscardReason, ReconcileOutcome, SyncEvent, SyncState, SyncView};
use crate::feed_subscriber::{ChangeFeedSubscriber, FeedSignal};
use crate::replica_cache::ReplicaCache;
use crate::session_store::SessionStore;
use marks_core::bookmark::{Bookmark, BookmarkDraft, BookmarkGateway};
use marks_core::config::{AppConfig, DraftClearPolicy};
use marks_core::error::{MarksError, Result};
use marks_core::feed::ChangeFeedTransport;
use marks_core::session::Session;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const EVENT_CAPACITY: usize = 64;

/// State guarded together so that a completing reconciliation observes the
/// session state and the cache atomically.
struct Inner {
    state: SyncState,
    cache: ReplicaCache,
    /// Ticket of the last reconciliation written into `cache`
    applied_ticket: u64,
    /// Advances on every state change; work started under an older epoch
    /// must not touch `cache`.
    epoch: u64,
}

/// Receivers consumed by [`SyncController::run`].
struct Triggers {
    transitions: mpsc::UnboundedReceiver<Option<Session>>,
    feed: mpsc::UnboundedReceiver<FeedSignal>,
}

/// Keeps the replica cache in sync with the signed-in owner's remote records.
///
/// `SyncController` is responsible for:
/// - Following session transitions (subscribe, reconcile, clear on logout)
/// - Reconciling on entry, on feed signals and on explicit refresh
/// - Optimistic local application of confirmed inserts and deletes
/// - Discarding listings that finish after the session changed
///
/// Create it before calling [`SessionStore::initialize`] so the startup
/// transition is observed.
pub struct SyncController {
    sessions: Arc<SessionStore>,
    gateway: Arc<dyn BookmarkGateway>,
    feed: ChangeFeedSubscriber,
    draft_policy: DraftClearPolicy,
    inner: Mutex<Inner>,
    draft: Mutex<BookmarkDraft>,
    next_ticket: AtomicU64,
    state_tx: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
    feed_tx: mpsc::UnboundedSender<FeedSignal>,
    triggers: Mutex<Option<Triggers>>,
    reconciles: TaskTracker,
}

impl SyncController {
    /// Creates a controller in the `Authenticating` state.
    ///
    /// # Arguments
    ///
    /// * `sessions` - Session store whose transitions drive the controller
    /// * `gateway` - Request/response access to the remote collection
    /// * `feed` - Subscriber for the push channel
    /// * `draft_policy` - When the insert form's draft is cleared
    pub fn new(
        sessions: Arc<SessionStore>,
        gateway: Arc<dyn BookmarkGateway>,
        feed: ChangeFeedSubscriber,
        draft_policy: DraftClearPolicy,
    ) -> Self {
        let transitions = sessions.on_transition();
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            sessions,
            gateway,
            feed,
            draft_policy,
            inner: Mutex::new(Inner {
                state: SyncState::Authenticating,
                cache: ReplicaCache::new(),
                applied_ticket: 0,
                epoch: 0,
            }),
            draft: Mutex::new(BookmarkDraft::default()),
            next_ticket: AtomicU64::new(0),
            state_tx: watch::Sender::new(SyncState::Authenticating),
            events,
            feed_tx,
            triggers: Mutex::new(Some(Triggers {
                transitions,
                feed: feed_rx,
            })),
            reconciles: TaskTracker::new(),
        }
    }

    /// Creates a controller wired according to `config`.
    pub fn from_config(
        sessions: Arc<SessionStore>,
        gateway: Arc<dyn BookmarkGateway>,
        transport: Arc<dyn ChangeFeedTransport>,
        config: &AppConfig,
    ) -> Self {
        let feed = ChangeFeedSubscriber::new(
            transport,
            config.remote.table.clone(),
            config.feed.clone(),
        );
        Self::new(sessions, gateway, feed, config.sync.draft_clear_policy)
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(this.run(shutdown))
    }

    /// Processes session transitions and feed signals until `shutdown`.
    ///
    /// Reconciliations are spawned so that a slow listing never delays the
    /// handling of a later transition. On exit, spawned reconciliations are
    /// cancelled and awaited and the feed channel is released.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut triggers) = self.triggers.lock().await.take() else {
            tracing::warn!("[SyncController] Event loop is already running");
            return;
        };
        tracing::debug!("[SyncController] Event loop started");

        // Catch up on a store that settled before the loop started.
        let mut pending = None;
        while let Ok(session) = triggers.transitions.try_recv() {
            pending = Some(session);
        }
        if pending.is_none() && self.state().is_loading() && !self.sessions.is_loading() {
            pending = Some(self.sessions.current());
        }
        if let Some(session) = pending {
            if self.enter(session).await {
                self.spawn_reconcile(&shutdown);
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(session) = triggers.transitions.recv() => {
                    if self.enter(session).await {
                        self.spawn_reconcile(&shutdown);
                    }
                }
                Some(signal) = triggers.feed.recv() => {
                    if self.state().is_authenticated_as(&signal.owner_id) {
                        tracing::debug!(
                            "[SyncController] Change signal ({:?}) for owner {}",
                            signal.event.kind,
                            signal.owner_id
                        );
                        self.spawn_reconcile(&shutdown);
                    } else {
                        tracing::debug!(
                            "[SyncController] Ignoring change signal for inactive owner {}",
                            signal.owner_id
                        );
                    }
                }
                else => break,
            }
        }

        self.reconciles.close();
        self.reconciles.wait().await;
        self.reconciles.reopen();
        self.feed.unsubscribe().await;
        *self.triggers.lock().await = Some(triggers);
        tracing::debug!("[SyncController] Event loop stopped");
    }

    fn spawn_reconcile(self: &Arc<Self>, shutdown: &CancellationToken) {
        let this = Arc::clone(self);
        let shutdown = shutdown.clone();
        self.reconciles.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::debug!("[SyncController] Reconcile cancelled by shutdown");
                }
                // Failures are logged and published by reconcile itself.
                _ = this.reconcile() => {}
            }
        });
    }

    /// Applies a session transition and, when it leads to `Authenticated`,
    /// reconciles before returning.
    ///
    /// # Returns
    ///
    /// - `Some(result)`: The reconciliation triggered by entering `Authenticated`
    /// - `None`: The transition was a sign-out
    pub async fn handle_transition(
        &self,
        session: Option<Session>,
    ) -> Option<Result<ReconcileOutcome>> {
        if self.enter(session).await {
            Some(self.reconcile().await)
        } else {
            None
        }
    }

    /// Moves to the state implied by `session` and sets up the feed.
    ///
    /// Returns true if a reconciliation is due.
    async fn enter(&self, session: Option<Session>) -> bool {
        match session.filter(|session| session.live) {
            Some(session) => {
                let owner_id = session.owner_id;
                {
                    let mut inner = self.inner.lock().await;
                    if !inner.state.is_authenticated_as(&owner_id) {
                        if let Some(previous) = inner.state.owner_id() {
                            tracing::info!(
                                "[SyncController] Owner changed from {} to {}",
                                previous,
                                owner_id
                            );
                        }
                        inner.cache.clear();
                        self.set_state(
                            &mut inner,
                            SyncState::Authenticated {
                                owner_id: owner_id.clone(),
                            },
                        );
                    }
                }
                self.feed.subscribe(&owner_id, self.feed_tx.clone()).await;
                true
            }
            None => {
                {
                    let mut inner = self.inner.lock().await;
                    inner.cache.clear();
                    if inner.state != SyncState::Unauthenticated {
                        self.set_state(&mut inner, SyncState::Unauthenticated);
                    }
                }
                self.feed.unsubscribe().await;
                false
            }
        }
    }

    fn set_state(&self, inner: &mut Inner, state: SyncState) {
        tracing::info!("[SyncController] State: {:?} -> {:?}", inner.state, state);
        inner.state = state.clone();
        inner.epoch += 1;
        self.state_tx.send_replace(state.clone());
        self.emit(SyncEvent::StateChanged(state));
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine; nobody is rendering.
        let _ = self.events.send(event);
    }

    /// Owner and epoch the caller's remote work belongs to.
    async fn require_owner(&self) -> Result<(String, u64)> {
        let inner = self.inner.lock().await;
        inner
            .state
            .owner_id()
            .map(|owner_id| (owner_id.to_string(), inner.epoch))
            .ok_or_else(|| MarksError::auth("not signed in"))
    }

    /// Replaces the cache with the owner's authoritative listing.
    ///
    /// The result is applied only if, when the listing completes, the
    /// session has not changed since the listing started (not even a
    /// sign-out followed by a sign-in as the same owner) and no
    /// later-started reconciliation has been applied already.
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileOutcome::Applied { .. })`: The cache now holds the listing
    /// - `Ok(ReconcileOutcome::Discarded(_))`: The listing was stale
    /// - `Ok(ReconcileOutcome::Skipped)`: Not authenticated
    /// - `Err(MarksError::Remote)`: The listing failed; the cache is unchanged
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let (owner_id, epoch, ticket) = {
            let inner = self.inner.lock().await;
            match inner.state.owner_id() {
                Some(owner_id) => (
                    owner_id.to_string(),
                    inner.epoch,
                    self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1,
                ),
                None => {
                    tracing::debug!("[SyncController] Not authenticated, skipping reconcile");
                    return Ok(ReconcileOutcome::Skipped);
                }
            }
        };

        tracing::debug!("[SyncController] Reconcile #{} for owner {}", ticket, owner_id);
        let listing = self.gateway.list_owned(&owner_id).await;

        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            drop(inner);
            tracing::info!(
                "[SyncController] Discarding listing #{} for owner {}: session changed",
                ticket,
                owner_id
            );
            return Ok(self.discard(owner_id, DiscardReason::SessionChanged));
        }

        let records = match listing.and_then(|records| check_ownership(&owner_id, records)) {
            Ok(records) => records,
            Err(error) => {
                drop(inner);
                tracing::warn!("[SyncController] Reconcile for owner {} failed: {}", owner_id, error);
                self.emit(SyncEvent::ReconcileFailed {
                    owner_id,
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        if ticket < inner.applied_ticket {
            drop(inner);
            tracing::debug!("[SyncController] Listing #{} superseded", ticket);
            return Ok(self.discard(owner_id, DiscardReason::Superseded));
        }

        let count = records.len();
        inner.cache.replace(records);
        inner.applied_ticket = ticket;
        drop(inner);

        tracing::debug!(
            "[SyncController] Applied {} record(s) for owner {}",
            count,
            owner_id
        );
        self.emit(SyncEvent::Reconciled { owner_id, count });
        Ok(ReconcileOutcome::Applied { count })
    }

    fn discard(&self, owner_id: String, reason: DiscardReason) -> ReconcileOutcome {
        self.emit(SyncEvent::ReconcileDiscarded { owner_id, reason });
        ReconcileOutcome::Discarded(reason)
    }

    /// Explicit user-requested reconciliation.
    pub async fn refresh(&self) -> Result<ReconcileOutcome> {
        tracing::info!("[SyncController] Refresh requested");
        self.reconcile().await
    }

    /// Inserts a bookmark and, once the server confirmed it, shows it first.
    ///
    /// # Errors
    ///
    /// - `MarksError::Validation`: blank title or url; nothing was sent
    /// - `MarksError::Auth`: not signed in; nothing was sent
    /// - `MarksError::Remote`: the insert failed; the cache is unchanged
    pub async fn add_bookmark(&self, title: &str, url: &str) -> Result<Bookmark> {
        self.insert(BookmarkDraft::new(title, url), false).await
    }

    /// Inserts the current draft, clearing it per the draft policy.
    pub async fn submit_draft(&self) -> Result<Bookmark> {
        let draft = self.draft.lock().await.clone();
        self.insert(draft, true).await
    }

    async fn insert(&self, draft: BookmarkDraft, from_draft: bool) -> Result<Bookmark> {
        let result = self.try_insert(&draft, from_draft).await;
        match &result {
            Ok(bookmark) => self.emit(SyncEvent::Inserted(bookmark.clone())),
            Err(error) => {
                tracing::warn!("[SyncController] Insert failed: {}", error);
                self.emit(SyncEvent::InsertFailed(error.clone()));
            }
        }
        result
    }

    async fn try_insert(&self, draft: &BookmarkDraft, from_draft: bool) -> Result<Bookmark> {
        let (title, url) = draft.validate()?;
        let (owner_id, epoch) = self.require_owner().await?;

        if from_draft && self.draft_policy == DraftClearPolicy::OnIssue {
            self.clear_draft_if_unchanged(draft).await;
        }

        let bookmark = self.gateway.insert(&owner_id, &title, &url).await?;
        if bookmark.owner_id != owner_id {
            return Err(MarksError::remote(
                "insert",
                "server returned a record of another owner",
            ));
        }

        {
            let mut inner = self.inner.lock().await;
            if inner.epoch == epoch {
                inner.cache.prepend(bookmark.clone());
            } else {
                tracing::debug!(
                    "[SyncController] Session changed during insert, not caching {}",
                    bookmark.id
                );
            }
        }

        if from_draft && self.draft_policy == DraftClearPolicy::OnSuccess {
            self.clear_draft_if_unchanged(draft).await;
        }
        tracing::info!("[SyncController] Inserted bookmark {}", bookmark.id);
        Ok(bookmark)
    }

    /// Leaves edits made after submission alone.
    async fn clear_draft_if_unchanged(&self, submitted: &BookmarkDraft) {
        let mut draft = self.draft.lock().await;
        if *draft == *submitted {
            draft.clear();
        }
    }

    /// Deletes a bookmark and, once the server confirmed it, removes it locally.
    ///
    /// Deleting an id that no longer exists succeeds and changes nothing.
    pub async fn delete_bookmark(&self, id: &str) -> Result<()> {
        let result = self.try_delete(id).await;
        match &result {
            Ok(()) => self.emit(SyncEvent::Deleted { id: id.to_string() }),
            Err(error) => {
                tracing::warn!("[SyncController] Delete of {} failed: {}", id, error);
                self.emit(SyncEvent::DeleteFailed {
                    id: id.to_string(),
                    error: error.clone(),
                });
            }
        }
        result
    }

    async fn try_delete(&self, id: &str) -> Result<()> {
        let (_, epoch) = self.require_owner().await?;
        self.gateway.delete(id).await?;

        let mut inner = self.inner.lock().await;
        if inner.epoch == epoch && !inner.cache.remove(id) {
            tracing::debug!("[SyncController] Deleted {} was not cached", id);
        }
        Ok(())
    }

    /// Signs out through the session store; the loop reacts to the transition.
    pub async fn sign_out(&self) -> Result<()> {
        self.sessions.sign_out().await
    }

    pub async fn draft(&self) -> BookmarkDraft {
        self.draft.lock().await.clone()
    }

    pub async fn set_draft(&self, draft: BookmarkDraft) {
        *self.draft.lock().await = draft;
    }

    /// Current state and records, for rendering.
    pub async fn view(&self) -> SyncView {
        let inner = self.inner.lock().await;
        SyncView {
            state: inner.state.clone(),
            records: inner.cache.snapshot(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that always holds the latest state.
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Releases the feed channel. The event loop also does this on exit.
    pub async fn shutdown(&self) {
        self.feed.unsubscribe().await;
    }
}

/// A listing must only contain the owner's records.
fn check_ownership(owner_id: &str, records: Vec<Bookmark>) -> Result<Vec<Bookmark>> {
    if let Some(foreign) = records.iter().find(|record| record.owner_id != owner_id) {
        return Err(MarksError::remote(
            "list",
            format!(
                "listing for owner {} contained record {} of another owner",
                owner_id, foreign.id
            ),
        ));
    }
    Ok(records)
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
