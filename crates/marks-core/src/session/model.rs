use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated identity session.
///
/// A session exists from successful authentication until an explicit logout
/// or a provider-driven invalidation. It is owned by the session store; every
/// other component only reads it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier of the user that owns the records
    pub owner_id: String,
    /// Bearer token presented to the remote store
    pub access_token: String,
    /// Token used to obtain a fresh access token, if the provider issued one
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token stops being accepted
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Cleared when the provider invalidates the session
    #[serde(default = "default_live")]
    pub live: bool,
}

fn default_live() -> bool {
    true
}

impl Session {
    /// Creates a live session without refresh information.
    pub fn new(owner_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            live: true,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true if the access token has expired at `now`.
    ///
    /// A small skew is subtracted so a token about to expire is treated as
    /// already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(30) <= now,
            None => false,
        }
    }

    /// Returns true if the session can be used for remote calls right now.
    pub fn is_live(&self) -> bool {
        self.live && !self.is_expired_at(Utc::now())
    }
}

// Tokens stay out of logs and panic messages.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("owner_id", &self.owner_id)
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("live", &self.live)
            .finish()
    }
}

/// Tokens handed back by the identity provider's redirect flow.
///
/// The redirect itself is opaque to this crate; whoever drives it passes the
/// resulting tokens here so the provider can turn them into a [`Session`].
#[derive(Clone, Serialize, Deserialize)]
pub struct SignInGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for SignInGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
