//! Persisted session storage.
//!
//! Keeps the identity session between process runs in `session.json`, which
//! is how a later start finds "a session from a prior visit".

use crate::paths::{MarksPaths, create_private};
use marks_core::error::Result;
use marks_core::session::Session;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Storage for the persisted session file (session.json).
///
/// # Security Note
///
/// The file holds plaintext bearer tokens and is created with 600
/// permissions on Unix.
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    /// Creates a FileSessionStorage for `session.json` under the given paths.
    pub fn new(paths: &MarksPaths) -> Result<Self> {
        Ok(Self {
            path: paths.session_file()?,
        })
    }

    /// Creates a FileSessionStorage with a custom path (for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the persisted session.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Session))`: A session was stored
    /// - `Ok(None)`: No session file
    /// - `Err(_)`: The file could not be read or parsed
    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let session = serde_json::from_str(&content)?;
        Ok(Some(session))
    }

    /// Persists the session, replacing any previous one.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(session)?;
        let mut file = create_private(&self.path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Removes the persisted session. Succeeds if there was none.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the path to the session file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
