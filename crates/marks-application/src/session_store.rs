//! SessionStore - single owner of the current identity session.
//!
//! Every change of the session (restore on startup, sign-in, refresh,
//! sign-out, provider invalidation) is published to the listeners registered
//! with [`SessionStore::on_transition`], in the order the changes happened.

use marks_core::error::{MarksError, Result};
use marks_core::session::{CredentialSource, IdentityProvider, Session, SignInGrant};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::mpsc;

/// Where the store is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// The startup lookup has not finished yet
    Loading,
    SignedOut,
    SignedIn(Session),
}

/// Holds the current session and notifies listeners of transitions.
pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    status: RwLock<SessionStatus>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Option<Session>>>>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self {
            provider,
            status: RwLock::new(SessionStatus::Loading),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Option<Session>>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the current session, or `None` while loading or signed out.
    pub fn current(&self) -> Option<Session> {
        match &*self.status.read().unwrap_or_else(|e| e.into_inner()) {
            SessionStatus::SignedIn(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.status(), SessionStatus::Loading)
    }

    /// Registers a listener for session transitions.
    ///
    /// Each transition delivers the new session (`None` when signed out).
    /// Listeners only see transitions that happen after they register.
    pub fn on_transition(&self) -> mpsc::UnboundedReceiver<Option<Session>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners().push(tx);
        rx
    }

    /// Performs the one-time startup lookup.
    ///
    /// Always leaves the store out of `Loading`: a failed lookup is reported
    /// and treated as signed out.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: A previous session was restored
    /// - `Ok(None)`: No session exists, or the store was already initialized
    /// - `Err(MarksError::Auth)`: The lookup failed; the store is signed out
    pub async fn initialize(&self) -> Result<Option<Session>> {
        if !self.is_loading() {
            tracing::warn!("[SessionStore] initialize called twice, ignoring");
            return Ok(None);
        }

        match self.provider.restore_session().await {
            Ok(session) => {
                match &session {
                    Some(s) => tracing::info!("[SessionStore] Restored session for owner {}", s.owner_id),
                    None => tracing::info!("[SessionStore] No previous session"),
                }
                self.transition_to(session.clone());
                Ok(session)
            }
            Err(e) => {
                tracing::warn!("[SessionStore] Session lookup failed: {}", e);
                self.transition_to(None);
                Err(MarksError::auth(format!("session lookup failed: {}", e)))
            }
        }
    }

    /// URL that starts the provider's sign-in redirect.
    pub fn authorize_url(&self, redirect_to: Option<&str>) -> Result<String> {
        self.provider.authorize_url(redirect_to)
    }

    /// Completes an external sign-in and transitions to the new session.
    ///
    /// A failed sign-in leaves the current state untouched.
    pub async fn sign_in(&self, grant: SignInGrant) -> Result<Session> {
        let session = self.provider.complete_sign_in(grant).await?;
        self.transition_to(Some(session.clone()));
        Ok(session)
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns `MarksError::Auth` when signed out or when the provider refuses;
    /// the current session is kept in the latter case.
    pub async fn refresh(&self) -> Result<Session> {
        let current = self
            .current()
            .ok_or_else(|| MarksError::auth("no session to refresh"))?;
        let refreshed = self.provider.refresh(&current).await?;
        tracing::debug!("[SessionStore] Refreshed session for owner {}", refreshed.owner_id);
        self.transition_to(Some(refreshed.clone()));
        Ok(refreshed)
    }

    /// Signs out locally, then tells the provider.
    ///
    /// The local transition happens even if the provider call fails; the
    /// provider error is still returned.
    pub async fn sign_out(&self) -> Result<()> {
        let Some(current) = self.current() else {
            tracing::debug!("[SessionStore] sign_out without a session");
            return Ok(());
        };
        self.transition_to(None);
        tracing::info!("[SessionStore] Signed out owner {}", current.owner_id);
        self.provider.sign_out(&current).await
    }

    /// Records a session change and notifies every listener.
    ///
    /// Used for changes driven from outside the store, such as the provider
    /// invalidating a session.
    pub fn transition_to(&self, session: Option<Session>) {
        // Listener lock held across the status write keeps delivery order
        // identical to write order.
        let mut listeners = self.listeners();
        {
            let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
            *status = match &session {
                Some(s) => SessionStatus::SignedIn(s.clone()),
                None => SessionStatus::SignedOut,
            };
        }
        listeners.retain(|listener| listener.send(session.clone()).is_ok());
    }
}

impl CredentialSource for SessionStore {
    fn access_token(&self) -> Option<String> {
        self.current()
            .filter(|session| session.live)
            .map(|session| session.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marks_infrastructure::InMemoryIdentityProvider;

    fn grant(token: &str) -> SignInGrant {
        SignInGrant {
            access_token: token.to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: None,
        }
    }

    #[tokio::test]
    async fn test_starts_loading_and_initializes_signed_out() {
        let store = SessionStore::new(Arc::new(InMemoryIdentityProvider::new()));
        assert!(store.is_loading());
        let mut transitions = store.on_transition();

        assert!(store.initialize().await.unwrap().is_none());
        assert_eq!(store.status(), SessionStatus::SignedOut);
        assert_eq!(transitions.recv().await, Some(None));
    }

    #[tokio::test]
    async fn test_initialize_restores_stored_session() {
        let session = Session::new("owner-1", "tok-1");
        let provider = InMemoryIdentityProvider::with_stored_session(session.clone());
        let store = SessionStore::new(Arc::new(provider));
        let mut transitions = store.on_transition();

        assert_eq!(store.initialize().await.unwrap(), Some(session.clone()));
        assert_eq!(store.current(), Some(session.clone()));
        assert_eq!(store.access_token().as_deref(), Some("tok-1"));
        assert_eq!(transitions.recv().await, Some(Some(session)));
    }

    #[tokio::test]
    async fn test_failed_lookup_is_signed_out() {
        let provider = InMemoryIdentityProvider::new();
        provider.set_fail_restore(true);
        let store = SessionStore::new(Arc::new(provider));

        let err = store.initialize().await.unwrap_err();
        assert!(err.is_auth());
        assert!(!store.is_loading());
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_initialize_only_once() {
        let session = Session::new("owner-1", "tok-1");
        let provider = Arc::new(InMemoryIdentityProvider::with_stored_session(session));
        let store = SessionStore::new(provider);
        store.initialize().await.unwrap();
        let mut transitions = store.on_transition();

        assert!(store.initialize().await.unwrap().is_none());
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sign_in_refresh_sign_out_sequence() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        provider.register("tok-1", "owner-1");
        let store = SessionStore::new(provider.clone());
        store.initialize().await.unwrap();
        let mut transitions = store.on_transition();

        let session = store.sign_in(grant("tok-1")).await.unwrap();
        assert_eq!(session.owner_id, "owner-1");
        let refreshed = store.refresh().await.unwrap();
        assert_eq!(refreshed.access_token, "tok-1-r");
        store.sign_out().await.unwrap();

        assert_eq!(transitions.recv().await, Some(Some(session)));
        assert_eq!(transitions.recv().await, Some(Some(refreshed)));
        assert_eq!(transitions.recv().await, Some(None));
        assert!(provider.stored_session().is_none());
        assert!(store.access_token().is_none());
    }

    #[tokio::test]
    async fn test_rejected_sign_in_keeps_state() {
        let store = SessionStore::new(Arc::new(InMemoryIdentityProvider::new()));
        store.initialize().await.unwrap();
        let mut transitions = store.on_transition();

        let err = store.sign_in(grant("unknown")).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(store.status(), SessionStatus::SignedOut);
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_without_session_fails() {
        let store = SessionStore::new(Arc::new(InMemoryIdentityProvider::new()));
        store.initialize().await.unwrap();
        assert!(store.refresh().await.unwrap_err().is_auth());
    }

    #[test]
    fn test_invalidated_session_has_no_token() {
        let store = SessionStore::new(Arc::new(InMemoryIdentityProvider::new()));
        let mut session = Session::new("owner-1", "tok-1");
        session.live = false;
        store.transition_to(Some(session));
        assert!(store.access_token().is_none());
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let store = SessionStore::new(Arc::new(InMemoryIdentityProvider::new()));
        drop(store.on_transition());
        let mut kept = store.on_transition();

        store.transition_to(None);
        assert_eq!(kept.try_recv().unwrap(), None);
        assert_eq!(store.listeners().len(), 1);
    }
}
