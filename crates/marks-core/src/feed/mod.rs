//! Change-feed domain module.
//!
//! Types and the transport trait for the push channel that announces remote
//! mutations of the owner's records. Events are only ever used as a refetch
//! trigger; their payload is parsed for logging but never trusted.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Kind of remote mutation announced by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Emitted by transports when a channel (re)connects and missed events
    /// may exist
    Resync,
    #[serde(other)]
    Unknown,
}

/// A single change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub table: Option<String>,
    /// New row image, if the transport sent one (untrusted)
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    /// Old row image, if the transport sent one (untrusted)
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind) -> Self {
        Self {
            kind,
            table: None,
            record: None,
            old_record: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_record(mut self, record: serde_json::Value) -> Self {
        self.record = Some(record);
        self
    }

    /// Event sent once per successful (re)connect.
    pub fn resync() -> Self {
        Self::new(ChangeKind::Resync)
    }
}

/// Scope of one push channel: a collection and the owner whose rows it
/// watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: String,
    pub owner_id: String,
}

impl FeedFilter {
    pub fn new(table: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Row filter in the remote store's `column=op.value` syntax.
    pub fn row_filter(&self) -> String {
        format!("user_id=eq.{}", self.owner_id)
    }
}

/// A push channel to the remote store's change stream.
///
/// The subscriber owns reconnection and teardown; a transport only runs a
/// single connection.
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync {
    /// Connects and forwards every event for `filter` into `events` until
    /// `shutdown` is cancelled or the connection ends.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The connection ended because of `shutdown`, the server
    ///   closed the stream, or `events` was dropped
    /// - `Err(_)`: The connection could not be established or broke
    async fn run(
        &self,
        filter: &FeedFilter,
        events: mpsc::UnboundedSender<ChangeEvent>,
        shutdown: CancellationToken,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_insert_event() {
        let event: ChangeEvent = serde_json::from_str(
            r#"{"type":"INSERT","table":"bookmarks","record":{"id":"1"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.table.as_deref(), Some("bookmarks"));
        assert!(event.record.is_some());
    }

    #[test]
    fn test_parse_unknown_kind() {
        let event: ChangeEvent = serde_json::from_str(r#"{"type":"TRUNCATE"}"#).unwrap();
        assert_eq!(event.kind, ChangeKind::Unknown);
    }

    #[test]
    fn test_row_filter() {
        let filter = FeedFilter::new("bookmarks", "owner-1");
        assert_eq!(filter.row_filter(), "user_id=eq.owner-1");
    }
}
