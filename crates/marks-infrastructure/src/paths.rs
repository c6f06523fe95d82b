//! Unified path management for marks configuration files.
//!
//! # Directory Structure
//!
//! ```text
//! ~/.config/marks/             # Config directory (platform config dir + "marks")
//! ├── config.toml              # Remote store / feed / sync settings
//! └── session.json             # Persisted identity session (0600 on Unix)
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "marks";

/// Errors that can occur during path resolution.
#[derive(Debug)]
pub enum PathError {
    /// Platform config directory could not be determined.
    ConfigDirNotFound,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ConfigDirNotFound => write!(f, "Cannot find config directory"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for marks_core::MarksError {
    fn from(err: PathError) -> Self {
        marks_core::MarksError::config(err.to_string())
    }
}

/// Unified path management for marks.
///
/// With no explicit base the platform config directory is used
/// (`dirs::config_dir()`, i.e. XDG on Linux, `Application Support` on macOS).
/// An explicit base replaces the whole `~/.config/marks` directory, which is
/// what tests and the `--config-dir` flag use.
#[derive(Debug, Clone)]
pub struct MarksPaths {
    base: Option<PathBuf>,
}

impl MarksPaths {
    pub fn new(base: Option<PathBuf>) -> Self {
        Self { base }
    }

    /// Returns the marks configuration directory.
    ///
    /// # Returns
    ///
    /// - `Ok(PathBuf)`: Path to config directory (e.g., `~/.config/marks/`)
    /// - `Err(PathError::ConfigDirNotFound)`: Could not determine directory
    pub fn config_dir(&self) -> Result<PathBuf, PathError> {
        match &self.base {
            Some(base) => Ok(base.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .ok_or(PathError::ConfigDirNotFound),
        }
    }

    /// Returns the path to the main configuration file.
    pub fn config_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("config.toml"))
    }

    /// Returns the path to the persisted session.
    ///
    /// # Security Note
    ///
    /// The file holds bearer tokens; `FileSessionStorage` writes it with 600
    /// permissions on Unix.
    pub fn session_file(&self) -> Result<PathBuf, PathError> {
        Ok(self.config_dir()?.join("session.json"))
    }

    /// Creates the config directory if needed.
    pub fn ensure_config_dir(&self) -> Result<PathBuf, std::io::Error> {
        let dir = self
            .config_dir()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl Default for MarksPaths {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Opens `path` truncated for writing, readable only by the user on Unix.
///
/// A new file is created with mode 0600; an existing one is truncated and
/// narrowed to 0600 before anything is written to it.
pub(crate) fn create_private(path: &Path) -> Result<File, std::io::Error> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_base() {
        let temp_dir = TempDir::new().unwrap();
        let paths = MarksPaths::new(Some(temp_dir.path().to_path_buf()));

        assert_eq!(paths.config_dir().unwrap(), temp_dir.path());
        assert!(paths.config_file().unwrap().ends_with("config.toml"));
        assert!(paths.session_file().unwrap().ends_with("session.json"));
        assert!(paths.session_file().unwrap().starts_with(temp_dir.path()));
    }

    #[test]
    fn test_ensure_config_dir_creates_nested() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("marks");
        let paths = MarksPaths::new(Some(nested.clone()));

        let dir = paths.ensure_config_dir().unwrap();
        assert_eq!(dir, nested);
        assert!(nested.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_create_private_is_user_only_before_any_write() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret.json");
        let _file = create_private(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_create_private_narrows_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret.json");
        std::fs::write(&path, "old token").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let _file = create_private(&path).unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        assert_eq!(metadata.len(), 0);
    }
}
