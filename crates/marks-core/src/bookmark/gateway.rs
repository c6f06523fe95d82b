//! Remote record gateway trait.
//!
//! Defines the request/response interface over the remote store's bookmark
//! collection.

use super::model::Bookmark;
use crate::error::Result;
use async_trait::async_trait;

/// Stateless wrapper over the remote store's query, insert and delete
/// operations for the bookmark collection.
///
/// Calls are implicitly scoped by the ambient credential of the current
/// session. Every failure is reported as `MarksError::Remote`; no call has
/// partial effects.
#[async_trait]
pub trait BookmarkGateway: Send + Sync {
    /// Lists the owner's bookmarks, newest first.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<Bookmark>)`: All records owned by `owner_id`, ordered by
    ///   `created_at` descending
    /// - `Err(_)`: Network or auth failure; nothing should be assumed
    async fn list_owned(&self, owner_id: &str) -> Result<Vec<Bookmark>>;

    /// Inserts a bookmark and returns the stored record.
    ///
    /// `url` is expected to be normalized already (see
    /// [`normalize_url`](super::normalize_url)).
    ///
    /// # Returns
    ///
    /// - `Ok(Bookmark)`: The record with its server-assigned id and timestamp
    /// - `Err(_)`: Nothing was inserted
    async fn insert(&self, owner_id: &str, title: &str, url: &str) -> Result<Bookmark>;

    /// Deletes a bookmark by id.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Record deleted successfully (or didn't exist)
    /// - `Err(_)`: Error occurred during deletion
    async fn delete(&self, id: &str) -> Result<()>;
}
