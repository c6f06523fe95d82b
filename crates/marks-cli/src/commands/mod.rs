pub mod auth;
pub mod bookmarks;
pub mod watch;

use crate::bootstrap::AppBootstrap;
use anyhow::{Context, Result, bail};

/// Restores the stored session and brings the controller into
/// `Authenticated`, reconciling once.
async fn open_session(app: &AppBootstrap) -> Result<()> {
    let Some(session) = app
        .sessions
        .initialize()
        .await
        .context("Failed to restore the session")?
    else {
        bail!("Not signed in. Run `marks auth-url`, then `marks login --access-token ...`.");
    };

    if let Some(reconciled) = app.controller.handle_transition(Some(session)).await {
        reconciled.context("Failed to load bookmarks")?;
    }
    Ok(())
}
