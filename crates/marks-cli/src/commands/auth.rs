use crate::bootstrap::AppBootstrap;
use anyhow::{Context, Result};
use marks_core::session::SignInGrant;

pub fn auth_url(app: &AppBootstrap, redirect_to: Option<&str>) -> Result<()> {
    let url = app.sessions.authorize_url(redirect_to)?;
    println!("Open this URL to sign in:\n{}", url);
    println!("Then run `marks login --access-token <token>` with the token from the redirect.");
    Ok(())
}

pub async fn login(
    app: &AppBootstrap,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
) -> Result<()> {
    // A failed lookup of the previous session does not block a new sign-in.
    if let Err(e) = app.sessions.initialize().await {
        tracing::warn!("[Login] Ignoring previous session: {}", e);
    }

    let session = app
        .sessions
        .sign_in(SignInGrant {
            access_token,
            refresh_token,
            expires_in,
        })
        .await
        .context("Sign-in failed")?;
    println!("Signed in as {}", session.owner_id);
    Ok(())
}

pub async fn logout(app: &AppBootstrap) -> Result<()> {
    let restored = app.sessions.initialize().await.ok().flatten();
    match restored {
        Some(session) => {
            app.sessions.sign_out().await.context("Remote sign-out failed")?;
            println!("Signed out {}", session.owner_id);
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

pub async fn refresh_token(app: &AppBootstrap) -> Result<()> {
    app.sessions
        .initialize()
        .await
        .context("Failed to restore the session")?;
    let session = app.sessions.refresh().await.context("Token refresh failed")?;
    match session.expires_at {
        Some(expires_at) => println!("Token refreshed, valid until {}", expires_at),
        None => println!("Token refreshed"),
    }
    Ok(())
}
