//! Domain layer for MARKS.
//!
//! Models, the shared error type, configuration structs and the traits at the
//! seams between the sync engine and the outside world (identity provider,
//! remote store, change feed).

pub mod bookmark;
pub mod config;
pub mod error;
pub mod feed;
pub mod session;

// Re-export common error type
pub use error::MarksError;
