//! File-backed storage for configuration and the persisted session.

mod config_storage;
mod session_storage;

pub use config_storage::{ConfigStorage, ENV_ANON_KEY, ENV_API_URL, ENV_TABLE};
pub use session_storage::FileSessionStorage;
