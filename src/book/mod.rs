//! Book entity and download state.
//!
//! A [`BookEntity`] combines the persisted display metadata for one edition
//! with the live, never-persisted [`DownloadState`]. The state is owned by the
//! download engine: entity construction always yields [`DownloadState::Fault`],
//! and only engine operations transition it afterwards.

use std::path::PathBuf;

use url::Url;

use crate::download::TransferHandle;

/// Live download state of a book.
///
/// Not persisted. Durability of "downloaded" is the presence of a file at the
/// permanent path derived from the identifier; on load the state starts as
/// [`Fault`](Self::Fault) and the engine reconciles it against the filesystem.
#[derive(Debug, Clone)]
pub enum DownloadState {
    /// No local file, no transfer in progress. Initial state of every entity
    /// and the reconciled state after a failed or cancelled transfer.
    Fault,
    /// A transfer is running. `total_bytes` is `-1` until the first progress
    /// report supplies a real content length.
    InProgress {
        /// Handle owned by the engine; cancelling it resolves the transfer
        /// with a cancellation completion event.
        handle: TransferHandle,
        /// Expected total size in bytes, or `-1` when unknown.
        total_bytes: i64,
        /// Bytes received so far.
        bytes_read: i64,
    },
    /// Terminal success. The file at `local_path` is authoritative.
    Downloaded {
        /// Permanent local path of the downloaded file.
        local_path: PathBuf,
    },
}

/// Progress snapshot derived from an in-progress state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    /// Completed fraction in `[0, 1]`. Always `0.0` when indeterminate.
    pub fraction: f64,
    /// True when the total size is not yet known (`total_bytes <= 0`).
    pub indeterminate: bool,
}

impl DownloadState {
    /// Returns true for [`DownloadState::Fault`].
    #[must_use]
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault)
    }

    /// Returns true for [`DownloadState::InProgress`].
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress { .. })
    }

    /// Returns true for [`DownloadState::Downloaded`].
    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        matches!(self, Self::Downloaded { .. })
    }

    /// Progress for an in-progress transfer, `None` otherwise.
    ///
    /// When the total size is unknown (`total_bytes <= 0`) the fraction is
    /// reported as `0` with `indeterminate` set, never as a computed value.
    #[must_use]
    pub fn progress(&self) -> Option<DownloadProgress> {
        let Self::InProgress {
            total_bytes,
            bytes_read,
            ..
        } = self
        else {
            return None;
        };

        if *total_bytes <= 0 {
            return Some(DownloadProgress {
                fraction: 0.0,
                indeterminate: true,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let fraction = (*bytes_read as f64 / *total_bytes as f64).clamp(0.0, 1.0);
        Some(DownloadProgress {
            fraction,
            indeterminate: false,
        })
    }
}

/// One book edition: persisted display metadata plus live download state.
///
/// At most one entity exists per `identifier` in the store at any time.
/// Metadata fields are set once at creation and immutable thereafter.
#[derive(Debug, Clone)]
pub struct BookEntity {
    identifier: String,
    title: Option<String>,
    authors: Option<String>,
    cover: Option<Vec<u8>>,
    source_url: Url,
    state: DownloadState,
}

impl BookEntity {
    /// Creates a new entity in the [`DownloadState::Fault`] state.
    #[must_use]
    pub fn new(
        identifier: impl Into<String>,
        title: Option<String>,
        authors: Option<String>,
        cover: Option<Vec<u8>>,
        source_url: Url,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            title,
            authors,
            cover,
            source_url,
            state: DownloadState::Fault,
        }
    }

    /// Stable external edition key; the primary lookup key.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display title, if known.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Display-joined author names, if known.
    #[must_use]
    pub fn authors(&self) -> Option<&str> {
        self.authors.as_deref()
    }

    /// Cover image bytes, if captured at creation.
    #[must_use]
    pub fn cover(&self) -> Option<&[u8]> {
        self.cover.as_deref()
    }

    /// Remote location of the downloadable file.
    #[must_use]
    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    /// Current download state.
    #[must_use]
    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    /// Replaces the state. Engine-only: every transition funnels through the
    /// download engine on the owner context.
    pub(crate) fn set_state(&mut self, state: DownloadState) {
        self.state = state;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entity(identifier: &str) -> BookEntity {
        BookEntity::new(
            identifier,
            Some("A Title".to_string()),
            Some("An Author".to_string()),
            None,
            Url::parse("https://archive.example/book.epub").unwrap(),
        )
    }

    #[test]
    fn test_new_entity_starts_in_fault() {
        let book = entity("OL1M");
        assert!(book.state().is_fault());
        assert!(book.state().progress().is_none());
    }

    #[test]
    fn test_progress_fraction_when_total_known() {
        let mut book = entity("OL1M");
        book.set_state(DownloadState::InProgress {
            handle: TransferHandle::detached(),
            total_bytes: 100,
            bytes_read: 50,
        });

        let progress = book.state().progress().unwrap();
        assert!((progress.fraction - 0.5).abs() < f64::EPSILON);
        assert!(!progress.indeterminate);
    }

    #[test]
    fn test_progress_indeterminate_when_total_unknown() {
        let mut book = entity("OL1M");
        for total_bytes in [-1, 0] {
            book.set_state(DownloadState::InProgress {
                handle: TransferHandle::detached(),
                total_bytes,
                bytes_read: 4096,
            });

            let progress = book.state().progress().unwrap();
            assert_eq!(progress.fraction, 0.0);
            assert!(progress.indeterminate);
        }
    }

    #[test]
    fn test_progress_monotonic_for_nondecreasing_bytes() {
        let mut book = entity("OL1M");
        let mut last = 0.0f64;
        for bytes_read in [0, 10, 10, 55, 100] {
            book.set_state(DownloadState::InProgress {
                handle: TransferHandle::detached(),
                total_bytes: 100,
                bytes_read,
            });
            let fraction = book.state().progress().unwrap().fraction;
            assert!(fraction >= last);
            last = fraction;
        }
        assert!((last - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_clamped_above_total() {
        let mut book = entity("OL1M");
        book.set_state(DownloadState::InProgress {
            handle: TransferHandle::detached(),
            total_bytes: 100,
            bytes_read: 150,
        });
        assert!((book.state().progress().unwrap().fraction - 1.0).abs() < f64::EPSILON);
    }
}
