//! Identity boundary traits.

use super::model::{Session, SignInGrant};
use crate::error::Result;
use async_trait::async_trait;

/// The identity provider the session store talks to.
///
/// The OAuth redirect flow is opaque: this crate only builds the URL that
/// starts it and consumes the tokens it eventually yields.
///
/// # Implementation Notes
///
/// Implementations should handle:
/// - Persisting the session so a later process start can restore it
/// - Refreshing an expired token during restore when possible
/// - Never logging token values
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Looks up a session left over from a previous run.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: A usable session was found
    /// - `Ok(None)`: No session exists
    /// - `Err(_)`: The lookup failed (treated as signed out by callers)
    async fn restore_session(&self) -> Result<Option<Session>>;

    /// Builds the URL that starts the external sign-in flow.
    ///
    /// # Arguments
    ///
    /// * `redirect_to` - Where the provider should send the user afterwards
    fn authorize_url(&self, redirect_to: Option<&str>) -> Result<String>;

    /// Turns the tokens produced by the redirect flow into a session.
    async fn complete_sign_in(&self, grant: SignInGrant) -> Result<Session>;

    /// Obtains a fresh access token for the session.
    async fn refresh(&self, session: &Session) -> Result<Session>;

    /// Ends the session with the provider and forgets it locally.
    async fn sign_out(&self, session: &Session) -> Result<()>;
}

/// Ambient credential used by adapters that talk to the remote store.
///
/// Gateways and feed transports do not receive the session explicitly; they
/// read the current access token from whoever owns the session.
pub trait CredentialSource: Send + Sync {
    /// Returns the bearer token of the current live session, if any.
    fn access_token(&self) -> Option<String>;
}
