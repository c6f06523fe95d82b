//! In-memory remote store.
//!
//! `InMemoryRemote` implements both `BookmarkGateway` and
//! `ChangeFeedTransport` over shared in-process state, so several clients
//! built on the same `Arc<InMemoryRemote>` see each other's writes through the
//! feed. It backs the CLI's `--demo` mode and the sync engine tests, which is
//! why it can pause and fail individual operations.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use marks_core::bookmark::{Bookmark, BookmarkGateway};
use marks_core::error::{MarksError, Result};
use marks_core::feed::{ChangeEvent, ChangeFeedTransport, ChangeKind, FeedFilter};
use marks_core::session::{IdentityProvider, Session, SignInGrant};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations that can be paused or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    List,
    Insert,
    Delete,
    Feed,
}

impl RemoteOp {
    fn name(self) -> &'static str {
        match self {
            RemoteOp::List => "list",
            RemoteOp::Insert => "insert",
            RemoteOp::Delete => "delete",
            RemoteOp::Feed => "feed",
        }
    }
}

/// A request the remote received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List { owner_id: String },
    Insert { owner_id: String, title: String, url: String },
    Delete { id: String },
}

#[derive(Default)]
struct RemoteState {
    rows: Vec<Bookmark>,
    calls: Vec<RemoteCall>,
    failing: HashSet<RemoteOp>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Holds requests of one operation while paused.
struct Gate {
    paused: watch::Sender<bool>,
    waiting: watch::Sender<usize>,
}

impl Gate {
    fn new() -> Self {
        Self {
            paused: watch::Sender::new(false),
            waiting: watch::Sender::new(0),
        }
    }

    async fn pass(&self) {
        let mut paused = self.paused.subscribe();
        if !*paused.borrow_and_update() {
            return;
        }
        self.waiting.send_modify(|n| *n += 1);
        let _ = paused.wait_for(|p| !*p).await;
        self.waiting.send_modify(|n| *n -= 1);
    }
}

/// Shared in-process remote store.
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
    changes: broadcast::Sender<(String, ChangeEvent)>,
    gates: HashMap<RemoteOp, Gate>,
    active_feeds: watch::Sender<usize>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        let gates = [RemoteOp::List, RemoteOp::Insert, RemoteOp::Delete]
            .into_iter()
            .map(|op| (op, Gate::new()))
            .collect();
        Self {
            state: Mutex::new(RemoteState::default()),
            changes,
            gates,
            active_feeds: watch::Sender::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        // A panic while holding the lock cannot leave the rows half-written.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every subsequent call of `op` fail until cleared.
    pub fn set_failing(&self, op: RemoteOp, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Holds calls of `op` until [`resume`](Self::resume). Has no effect on
    /// `RemoteOp::Feed`.
    pub fn pause(&self, op: RemoteOp) {
        if let Some(gate) = self.gates.get(&op) {
            gate.paused.send_replace(true);
        }
    }

    pub fn resume(&self, op: RemoteOp) {
        if let Some(gate) = self.gates.get(&op) {
            gate.paused.send_replace(false);
        }
    }

    /// Waits until at least `count` calls of `op` are held by a pause.
    pub async fn wait_for_held(&self, op: RemoteOp, count: usize) {
        if let Some(gate) = self.gates.get(&op) {
            let mut waiting = gate.waiting.subscribe();
            let _ = waiting.wait_for(|n| *n >= count).await;
        }
    }

    /// Number of feed connections currently open.
    pub fn active_feeds(&self) -> usize {
        *self.active_feeds.borrow()
    }

    /// Waits until exactly `count` feed connections are open.
    pub async fn wait_for_active_feeds(&self, count: usize) {
        let mut active = self.active_feeds.subscribe();
        let _ = active.wait_for(|n| *n == count).await;
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// The owner's rows as the remote sees them, newest first.
    pub fn rows_for(&self, owner_id: &str) -> Vec<Bookmark> {
        let state = self.state();
        let mut rows: Vec<Bookmark> = state
            .rows
            .iter()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// Writes a row without going through the gateway and without a feed
    /// event, e.g. data that existed before the client started.
    pub fn seed(&self, owner_id: &str, title: &str, url: &str) -> Bookmark {
        let mut state = self.state();
        let bookmark = new_row(&mut state, owner_id, title, url);
        state.rows.push(bookmark.clone());
        bookmark
    }

    fn check(&self, op: RemoteOp) -> Result<()> {
        if self.state().failing.contains(&op) {
            return Err(MarksError::remote(op.name(), "injected failure"));
        }
        Ok(())
    }

    async fn pass(&self, op: RemoteOp) {
        if let Some(gate) = self.gates.get(&op) {
            gate.pass().await;
        }
    }

    fn publish(&self, owner_id: &str, event: ChangeEvent) {
        // No receivers just means no client is subscribed.
        let _ = self.changes.send((owner_id.to_string(), event));
    }
}

fn new_row(state: &mut RemoteState, owner_id: &str, title: &str, url: &str) -> Bookmark {
    // Strictly increasing timestamps keep "newest first" unambiguous.
    let now = Utc::now();
    let created_at = match state.last_created_at {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    };
    state.last_created_at = Some(created_at);
    Bookmark {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        url: url.to_string(),
        owner_id: owner_id.to_string(),
        created_at,
    }
}

#[async_trait]
impl BookmarkGateway for InMemoryRemote {
    async fn list_owned(&self, owner_id: &str) -> Result<Vec<Bookmark>> {
        self.state().calls.push(RemoteCall::List {
            owner_id: owner_id.to_string(),
        });
        self.pass(RemoteOp::List).await;
        self.check(RemoteOp::List)?;
        Ok(self.rows_for(owner_id))
    }

    async fn insert(&self, owner_id: &str, title: &str, url: &str) -> Result<Bookmark> {
        self.state().calls.push(RemoteCall::Insert {
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            url: url.to_string(),
        });
        self.pass(RemoteOp::Insert).await;
        self.check(RemoteOp::Insert)?;

        let bookmark = {
            let mut state = self.state();
            let bookmark = new_row(&mut state, owner_id, title, url);
            state.rows.push(bookmark.clone());
            bookmark
        };
        self.publish(
            owner_id,
            ChangeEvent::new(ChangeKind::Insert)
                .with_table("bookmarks")
                .with_record(serde_json::json!({ "id": bookmark.id })),
        );
        Ok(bookmark)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.state().calls.push(RemoteCall::Delete { id: id.to_string() });
        self.pass(RemoteOp::Delete).await;
        self.check(RemoteOp::Delete)?;

        let removed = {
            let mut state = self.state();
            let position = state.rows.iter().position(|b| b.id == id);
            position.map(|pos| state.rows.remove(pos))
        };
        if let Some(bookmark) = removed {
            self.publish(
                &bookmark.owner_id,
                ChangeEvent::new(ChangeKind::Delete).with_table("bookmarks"),
            );
        }
        Ok(())
    }
}

struct FeedGuard<'a>(&'a watch::Sender<usize>);

impl Drop for FeedGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

#[async_trait]
impl ChangeFeedTransport for InMemoryRemote {
    async fn run(
        &self,
        filter: &FeedFilter,
        events: mpsc::UnboundedSender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.check(RemoteOp::Feed)?;

        let mut changes = self.changes.subscribe();
        self.active_feeds.send_modify(|n| *n += 1);
        let _guard = FeedGuard(&self.active_feeds);

        if events.send(ChangeEvent::resync()).is_err() {
            return Ok(());
        }

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                received = changes.recv() => received,
            };
            let event = match received {
                Ok((owner_id, event)) if owner_id == filter.owner_id => event,
                Ok(_) => continue,
                // Missed events collapse into one generic change.
                Err(broadcast::error::RecvError::Lagged(_)) => ChangeEvent::new(ChangeKind::Unknown),
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            };
            if events.send(event).is_err() {
                return Ok(());
            }
        }
    }
}

/// In-memory identity provider.
///
/// Access tokens are mapped to owners with [`register`](Self::register);
/// the "persisted" session lives in memory.
#[derive(Default)]
pub struct InMemoryIdentityProvider {
    users: Mutex<HashMap<String, String>>,
    stored: Mutex<Option<Session>>,
    fail_restore: Mutex<bool>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a session already stored, as if from a previous run.
    pub fn with_stored_session(session: Session) -> Self {
        let provider = Self::default();
        provider.register(&session.access_token, &session.owner_id);
        *provider.stored.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
        provider
    }

    /// Accepts `access_token` as a credential of `owner_id`.
    pub fn register(&self, access_token: &str, owner_id: &str) {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(access_token.to_string(), owner_id.to_string());
    }

    pub fn set_fail_restore(&self, fail: bool) {
        *self.fail_restore.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn stored_session(&self) -> Option<Session> {
        self.stored.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn store(&self, session: Option<Session>) {
        *self.stored.lock().unwrap_or_else(|e| e.into_inner()) = session;
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn restore_session(&self) -> Result<Option<Session>> {
        if *self.fail_restore.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(MarksError::auth("injected restore failure"));
        }
        Ok(self.stored_session())
    }

    fn authorize_url(&self, redirect_to: Option<&str>) -> Result<String> {
        Ok(match redirect_to {
            Some(redirect) => format!("memory://authorize?redirect_to={}", redirect),
            None => "memory://authorize".to_string(),
        })
    }

    async fn complete_sign_in(&self, grant: SignInGrant) -> Result<Session> {
        let owner_id = self
            .users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&grant.access_token)
            .cloned()
            .ok_or_else(|| MarksError::auth("access token was rejected"))?;

        let mut session = Session::new(owner_id, grant.access_token);
        session.refresh_token = grant.refresh_token;
        self.store(Some(session.clone()));
        Ok(session)
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let access_token = format!("{}-r", session.access_token);
        self.register(&access_token, &session.owner_id);
        let refreshed = Session {
            access_token,
            ..session.clone()
        };
        self.store(Some(refreshed.clone()));
        Ok(refreshed)
    }

    async fn sign_out(&self, _session: &Session) -> Result<()> {
        self.store(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_insert_then_list_newest_first() {
        let remote = InMemoryRemote::new();
        let first = remote.insert("owner-1", "First", "https://a.example").await.unwrap();
        let second = remote.insert("owner-1", "Second", "https://b.example").await.unwrap();
        remote.insert("owner-2", "Other", "https://c.example").await.unwrap();

        let listed = remote.list_owned("owner-1").await.unwrap();
        assert_eq!(listed, vec![second.clone(), first.clone()]);
        assert!(second.created_at > first.created_at);
    }

    #[tokio::test]
    async fn test_delete_missing_id_is_ok() {
        let remote = InMemoryRemote::new();
        remote.delete("does-not-exist").await.unwrap();
        assert_eq!(
            remote.calls(),
            vec![RemoteCall::Delete {
                id: "does-not-exist".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_rows_untouched() {
        let remote = InMemoryRemote::new();
        remote.set_failing(RemoteOp::Insert, true);

        let err = remote.insert("owner-1", "X", "https://x.example").await.unwrap_err();
        assert!(err.is_remote());
        assert!(remote.rows_for("owner-1").is_empty());

        remote.set_failing(RemoteOp::Insert, false);
        remote.insert("owner-1", "X", "https://x.example").await.unwrap();
        assert_eq!(remote.rows_for("owner-1").len(), 1);
    }

    #[tokio::test]
    async fn test_paused_list_waits_for_resume() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.seed("owner-1", "Seeded", "https://s.example");
        remote.pause(RemoteOp::List);

        let pending = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.list_owned("owner-1").await })
        };
        remote.wait_for_held(RemoteOp::List, 1).await;
        assert!(!pending.is_finished());

        remote.resume(RemoteOp::List);
        let listed = pending.await.unwrap().unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_feed_only_forwards_owner_events() {
        let remote = Arc::new(InMemoryRemote::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let feed = {
            let remote = remote.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                remote
                    .run(&FeedFilter::new("bookmarks", "owner-1"), tx, shutdown)
                    .await
            })
        };

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Resync);
        remote.insert("owner-2", "Other", "https://o.example").await.unwrap();
        remote.insert("owner-1", "Mine", "https://m.example").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Insert);

        shutdown.cancel();
        feed.await.unwrap().unwrap();
        assert_eq!(remote.active_feeds(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_identity_sign_in_and_out() {
        let provider = InMemoryIdentityProvider::new();
        provider.register("tok-1", "owner-1");

        let session = provider
            .complete_sign_in(SignInGrant {
                access_token: "tok-1".to_string(),
                refresh_token: None,
                expires_in: None,
            })
            .await
            .unwrap();
        assert_eq!(session.owner_id, "owner-1");
        assert_eq!(provider.restore_session().await.unwrap(), Some(session.clone()));

        provider.sign_out(&session).await.unwrap();
        assert!(provider.restore_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identity_rejects_unknown_token() {
        let provider = InMemoryIdentityProvider::new();
        let err = provider
            .complete_sign_in(SignInGrant {
                access_token: "nope".to_string(),
                refresh_token: None,
                expires_in: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }
}
