//! RestBookmarkGateway - PostgREST-style implementation of `BookmarkGateway`.
//!
//! Endpoints (relative to the project base URL):
//! - `GET    /rest/v1/{table}?select=*&user_id=eq.{owner}&order=created_at.desc`
//! - `POST   /rest/v1/{table}?select=*` with `Prefer: return=representation`
//! - `DELETE /rest/v1/{table}?id=eq.{id}`

use crate::rest_client::{RestClient, ensure_success};
use async_trait::async_trait;
use marks_core::bookmark::{Bookmark, BookmarkGateway};
use marks_core::config::RemoteConfig;
use marks_core::error::{MarksError, Result};
use marks_core::session::CredentialSource;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct NewBookmarkRow<'a> {
    title: &'a str,
    url: &'a str,
    user_id: &'a str,
}

/// Gateway that talks to the remote store's REST interface.
///
/// Requests carry the access token of whatever session `credentials`
/// currently holds.
#[derive(Clone)]
pub struct RestBookmarkGateway {
    rest: RestClient,
    table: String,
    credentials: Arc<dyn CredentialSource>,
}

impl RestBookmarkGateway {
    pub fn new(config: &RemoteConfig, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            rest: RestClient::new(config),
            table: config.table.clone(),
            credentials,
        }
    }

    fn table_path(&self) -> String {
        format!("rest/v1/{}", self.table)
    }

    fn token(&self, operation: &str) -> Result<String> {
        self.credentials
            .access_token()
            .ok_or_else(|| MarksError::remote(operation, "no live session to authorize request"))
    }

    fn list_request(&self, owner_id: &str, token: &str) -> RequestBuilder {
        self.rest
            .authorized(Method::GET, &self.table_path(), token)
            .query(&[
                ("select", "*".to_string()),
                ("user_id", format!("eq.{}", owner_id)),
                ("order", "created_at.desc".to_string()),
            ])
    }

    fn insert_request(&self, row: &NewBookmarkRow<'_>, token: &str) -> RequestBuilder {
        self.rest
            .authorized(Method::POST, &self.table_path(), token)
            .query(&[("select", "*")])
            .header("Prefer", "return=representation")
            .json(&[row])
    }

    fn delete_request(&self, id: &str, token: &str) -> RequestBuilder {
        self.rest
            .authorized(Method::DELETE, &self.table_path(), token)
            .query(&[("id", format!("eq.{}", id))])
    }
}

#[async_trait]
impl BookmarkGateway for RestBookmarkGateway {
    async fn list_owned(&self, owner_id: &str) -> Result<Vec<Bookmark>> {
        let token = self.token("list")?;
        let response = self
            .list_request(owner_id, &token)
            .send()
            .await
            .map_err(|e| MarksError::remote("list", e.to_string()))?;
        let response = ensure_success("list", response).await?;

        let bookmarks: Vec<Bookmark> = response
            .json()
            .await
            .map_err(|e| MarksError::remote("list", format!("invalid response body: {}", e)))?;

        tracing::debug!(
            "[RestBookmarkGateway] Listed {} bookmark(s) for owner {}",
            bookmarks.len(),
            owner_id
        );
        Ok(bookmarks)
    }

    async fn insert(&self, owner_id: &str, title: &str, url: &str) -> Result<Bookmark> {
        let token = self.token("insert")?;
        let row = NewBookmarkRow {
            title,
            url,
            user_id: owner_id,
        };
        let response = self
            .insert_request(&row, &token)
            .send()
            .await
            .map_err(|e| MarksError::remote("insert", e.to_string()))?;
        let response = ensure_success("insert", response).await?;

        let mut rows: Vec<Bookmark> = response
            .json()
            .await
            .map_err(|e| MarksError::remote("insert", format!("invalid response body: {}", e)))?;

        if rows.is_empty() {
            return Err(MarksError::remote(
                "insert",
                "server did not return the inserted row",
            ));
        }
        let bookmark = rows.swap_remove(0);

        tracing::debug!(
            "[RestBookmarkGateway] Inserted bookmark {} for owner {}",
            bookmark.id,
            owner_id
        );
        Ok(bookmark)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let token = self.token("delete")?;
        let response = self
            .delete_request(id, &token)
            .send()
            .await
            .map_err(|e| MarksError::remote("delete", e.to_string()))?;
        // Zero matched rows is still a success response.
        ensure_success("delete", response).await?;

        tracing::debug!("[RestBookmarkGateway] Deleted bookmark {}", id);
        Ok(())
    }
}
