use super::open_session;
use crate::bootstrap::AppBootstrap;
use crate::render::{render_bookmark, render_view};
use anyhow::Result;

pub async fn list(app: &AppBootstrap, json: bool) -> Result<()> {
    open_session(app).await?;
    let view = app.controller.view().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render_view(&view));
    }
    Ok(())
}

pub async fn add(app: &AppBootstrap, title: &str, url: &str) -> Result<()> {
    open_session(app).await?;
    let bookmark = app.controller.add_bookmark(title, url).await?;
    println!("Added:\n{}", render_bookmark(&bookmark));
    Ok(())
}

pub async fn delete(app: &AppBootstrap, id: &str) -> Result<()> {
    open_session(app).await?;
    app.controller.delete_bookmark(id).await?;
    println!("Deleted {}", id);
    Ok(())
}
