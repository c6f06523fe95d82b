//! RestIdentityProvider - `IdentityProvider` backed by the remote project's
//! auth endpoints, with the session persisted to `session.json`.
//!
//! Endpoints (relative to the project base URL):
//! - `GET  /auth/v1/authorize?provider=..&redirect_to=..` (browser redirect)
//! - `GET  /auth/v1/user` (token validation, yields the owner id)
//! - `POST /auth/v1/token?grant_type=refresh_token`
//! - `POST /auth/v1/logout`

use crate::rest_client::{RestClient, ensure_success};
use crate::storage::FileSessionStorage;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use marks_core::config::RemoteConfig;
use marks_core::error::{MarksError, Result};
use marks_core::session::{IdentityProvider, Session, SignInGrant};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserResponse,
}

/// Identity provider speaking to the remote project's auth API.
pub struct RestIdentityProvider {
    rest: RestClient,
    oauth_provider: String,
    default_redirect: Option<String>,
    storage: FileSessionStorage,
}

impl RestIdentityProvider {
    pub fn new(config: &RemoteConfig, storage: FileSessionStorage) -> Self {
        Self {
            rest: RestClient::new(config),
            oauth_provider: config.oauth_provider.clone(),
            default_redirect: config.redirect_url.clone(),
            storage,
        }
    }

    /// Resolves the owner id for an access token.
    ///
    /// Returns `Ok(None)` when the token is rejected.
    async fn fetch_user(&self, access_token: &str) -> Result<Option<UserResponse>> {
        let response = self
            .rest
            .authorized(Method::GET, "auth/v1/user", access_token)
            .send()
            .await
            .map_err(|e| MarksError::auth(format!("user lookup failed: {}", e)))?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Ok(None);
        }
        let response = ensure_success("user lookup", response)
            .await
            .map_err(|e| MarksError::auth(e.to_string()))?;
        let user = response
            .json::<UserResponse>()
            .await
            .map_err(|e| MarksError::auth(format!("invalid user response: {}", e)))?;
        Ok(Some(user))
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.storage.save(session) {
            // The in-memory session still works for this run.
            tracing::warn!("[RestIdentityProvider] Failed to persist session: {}", e);
        }
    }

    fn forget(&self) {
        if let Err(e) = self.storage.clear() {
            tracing::warn!("[RestIdentityProvider] Failed to clear session file: {}", e);
        }
    }
}

fn session_from_grant(owner_id: String, grant: SignInGrant) -> Session {
    let mut session = Session::new(owner_id, grant.access_token);
    session.refresh_token = grant.refresh_token;
    session.expires_at = grant
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs));
    session
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn restore_session(&self) -> Result<Option<Session>> {
        let stored = match self.storage.load() {
            Ok(Some(session)) => session,
            Ok(None) => {
                tracing::debug!("[RestIdentityProvider] No stored session");
                return Ok(None);
            }
            Err(e) => {
                tracing::warn!(
                    "[RestIdentityProvider] Discarding unreadable session file: {}",
                    e
                );
                self.forget();
                return Ok(None);
            }
        };

        if stored.is_live() && self.fetch_user(&stored.access_token).await?.is_some() {
            tracing::info!(
                "[RestIdentityProvider] Restored session for owner {}",
                stored.owner_id
            );
            return Ok(Some(stored));
        }

        if stored.refresh_token.is_some() {
            tracing::info!("[RestIdentityProvider] Stored token rejected, refreshing");
            return match self.refresh(&stored).await {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    tracing::warn!("[RestIdentityProvider] Refresh during restore failed: {}", e);
                    self.forget();
                    Ok(None)
                }
            };
        }

        tracing::info!("[RestIdentityProvider] Stored session expired");
        self.forget();
        Ok(None)
    }

    fn authorize_url(&self, redirect_to: Option<&str>) -> Result<String> {
        let mut params = vec![("provider", self.oauth_provider.as_str())];
        if let Some(redirect) = redirect_to.or(self.default_redirect.as_deref()) {
            params.push(("redirect_to", redirect));
        }
        let url = Url::parse_with_params(&self.rest.url("auth/v1/authorize"), &params)
            .map_err(|e| MarksError::config(format!("invalid remote.api_url: {}", e)))?;
        Ok(url.to_string())
    }

    async fn complete_sign_in(&self, grant: SignInGrant) -> Result<Session> {
        let user = self
            .fetch_user(&grant.access_token)
            .await?
            .ok_or_else(|| MarksError::auth("access token was rejected"))?;

        let session = session_from_grant(user.id, grant);
        self.persist(&session);
        tracing::info!(
            "[RestIdentityProvider] Signed in as owner {}",
            session.owner_id
        );
        Ok(session)
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let refresh_token = session
            .refresh_token
            .as_deref()
            .ok_or_else(|| MarksError::auth("session has no refresh token"))?;

        let response = self
            .rest
            .request(Method::POST, "auth/v1/token")
            .query(&[("grant_type", "refresh_token")])
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| MarksError::auth(format!("token refresh failed: {}", e)))?;
        let response = ensure_success("token refresh", response)
            .await
            .map_err(|e| MarksError::auth(e.to_string()))?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MarksError::auth(format!("invalid token response: {}", e)))?;

        let refreshed = session_from_grant(
            token.user.id,
            SignInGrant {
                access_token: token.access_token,
                refresh_token: token.refresh_token.or_else(|| session.refresh_token.clone()),
                expires_in: token.expires_in,
            },
        );
        self.persist(&refreshed);
        tracing::debug!(
            "[RestIdentityProvider] Refreshed session for owner {}",
            refreshed.owner_id
        );
        Ok(refreshed)
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        // Forget locally first so a failed remote logout still signs out here.
        self.forget();

        let response = self
            .rest
            .authorized(Method::POST, "auth/v1/logout", &session.access_token)
            .send()
            .await
            .map_err(|e| MarksError::auth(format!("logout failed: {}", e)))?;
        ensure_success("logout", response)
            .await
            .map_err(|e| MarksError::auth(e.to_string()))?;

        tracing::info!(
            "[RestIdentityProvider] Signed out owner {}",
            session.owner_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider(temp_dir: &TempDir, redirect: Option<&str>) -> RestIdentityProvider {
        let config = RemoteConfig {
            // Nothing listens here; tests below never reach the network.
            api_url: "http://127.0.0.1:9".to_string(),
            anon_key: "anon".to_string(),
            redirect_url: redirect.map(str::to_string),
            ..RemoteConfig::default()
        };
        let storage = FileSessionStorage::with_path(temp_dir.path().join("session.json"));
        RestIdentityProvider::new(&config, storage)
    }

    #[test]
    fn test_authorize_url_uses_configured_redirect() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir, Some("http://localhost:3000/callback"));

        let url = provider.authorize_url(None).unwrap();
        assert!(url.starts_with("http://127.0.0.1:9/auth/v1/authorize?"));
        assert!(url.contains("provider=google"));
        assert!(url.contains("redirect_to=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
    }

    #[test]
    fn test_authorize_url_explicit_redirect_wins() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir, Some("http://configured"));

        let url = provider.authorize_url(Some("http://explicit")).unwrap();
        assert!(url.contains("redirect_to=http%3A%2F%2Fexplicit"));
    }

    #[tokio::test]
    async fn test_restore_without_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir, None);

        assert!(provider.restore_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_expired_without_refresh_forgets_session() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir, None);
        let expired =
            Session::new("owner-1", "tok").with_expires_at(Utc::now() - Duration::hours(1));
        provider.storage.save(&expired).unwrap();

        assert!(provider.restore_session().await.unwrap().is_none());
        assert!(provider.storage.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_discards_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let provider = provider(&temp_dir, None);
        std::fs::write(provider.storage.path(), "not json").unwrap();

        assert!(provider.restore_session().await.unwrap().is_none());
        assert!(!provider.storage.path().exists());
    }

    #[test]
    fn test_session_from_grant_sets_expiry() {
        let session = session_from_grant(
            "owner-1".to_string(),
            SignInGrant {
                access_token: "tok".to_string(),
                refresh_token: Some("ref".to_string()),
                expires_in: Some(3600),
            },
        );
        assert_eq!(session.owner_id, "owner-1");
        assert!(session.is_live());
        assert!(session.expires_at.is_some());
    }
}
