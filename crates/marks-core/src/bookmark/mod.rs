//! Bookmark domain module.
//!
//! # Module Structure
//!
//! - `model`: Bookmark record, draft input and URL normalization
//! - `gateway`: Remote record gateway trait

mod gateway;
mod model;

// Re-export public API
pub use gateway::BookmarkGateway;
pub use model::{Bookmark, BookmarkDraft, normalize_url};
