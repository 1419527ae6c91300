//! Local storage layout for downloaded books.
//!
//! Paths are derived deterministically from the edition identifier so that a
//! restarted process can find completed (or stale partial) downloads without
//! any persisted state table:
//!
//! - temp path: `<temp_root>/books/<identifier>`
//! - permanent path: `<permanent_root>/books/<identifier>`
//!
//! The roots are explicit configuration rather than process-wide globals so
//! tests can point the engine at isolated temporary directories.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Subdirectory under both roots that holds book files.
const BOOKS_DIR: &str = "books";

/// Errors preparing the local storage layout.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to create a storage directory.
    #[error("failed to create storage directory {path}: {source}")]
    CreateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Storage roots for in-flight and completed downloads.
///
/// `temp_root` holds partially transferred files; `permanent_root` holds
/// completed downloads. Both are partitioned by identifier, so there is no
/// cross-entity contention at the file level.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    temp_root: PathBuf,
    permanent_root: PathBuf,
}

impl StorageConfig {
    /// Creates a config with the given roots.
    #[must_use]
    pub fn new(temp_root: impl Into<PathBuf>, permanent_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            permanent_root: permanent_root.into(),
        }
    }

    /// Creates the `books/` directory under both roots.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CreateDir`] if either directory cannot be
    /// created.
    pub fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [self.temp_books_dir(), self.permanent_books_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            debug!(path = %dir.display(), "storage directory ready");
        }
        Ok(())
    }

    /// Directory holding in-flight transfer files.
    #[must_use]
    pub fn temp_books_dir(&self) -> PathBuf {
        self.temp_root.join(BOOKS_DIR)
    }

    /// Directory holding completed downloads.
    #[must_use]
    pub fn permanent_books_dir(&self) -> PathBuf {
        self.permanent_root.join(BOOKS_DIR)
    }

    /// Temporary file path for an in-flight transfer of `identifier`.
    #[must_use]
    pub fn temp_path(&self, identifier: &str) -> PathBuf {
        self.temp_books_dir().join(identifier)
    }

    /// Permanent file path for a completed download of `identifier`.
    ///
    /// The presence of a file at this path is the durable representation of
    /// "this book is downloaded".
    #[must_use]
    pub fn permanent_path(&self, identifier: &str) -> PathBuf {
        self.permanent_books_dir().join(identifier)
    }

    /// Returns true if a completed download exists for `identifier`.
    #[must_use]
    pub fn has_permanent_file(&self, identifier: &str) -> bool {
        self.permanent_path(identifier).exists()
    }

    /// The configured temporary root.
    #[must_use]
    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// The configured permanent root.
    #[must_use]
    pub fn permanent_root(&self) -> &Path {
        &self.permanent_root
    }
}
