//! Consumed metadata-fetcher contract.
//!
//! The remote API client and its JSON parsing live outside this core; what
//! the core depends on is the shape of the data an edition lookup yields and
//! the rule for choosing which format to download. Clients implement
//! [`MetadataFetcher`] over their API stack and feed the result into
//! [`select_download_candidate`] to build a
//! [`DownloadRequest`](crate::library::DownloadRequest).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One downloadable format option for an edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFormat {
    /// Format tag as reported by the API (`epub`, `pdf`, `txt`, ...).
    pub format: String,
    /// Remote location of the file in this format.
    pub url: String,
}

/// Edition metadata as returned by the fetcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditionMetadata {
    /// Display title.
    pub title: Option<String>,
    /// Author names.
    pub authors: Vec<String>,
    /// Long-form description.
    pub description: Option<String>,
    /// Subject tags.
    pub subjects: Vec<String>,
    /// Cover-image identifiers, most preferred first.
    pub cover_ids: Vec<i64>,
    /// Available download formats.
    pub formats: Vec<DownloadFormat>,
}

impl EditionMetadata {
    /// Authors joined for display, or `None` when unknown.
    #[must_use]
    pub fn display_authors(&self) -> Option<String> {
        if self.authors.is_empty() {
            None
        } else {
            Some(self.authors.join(", "))
        }
    }
}

/// Failure fetching edition metadata. Opaque to this core; the fetcher
/// implementation decides what detail to carry.
#[derive(Debug, Error)]
#[error("failed to fetch metadata for {identifier}: {message}")]
pub struct FetchError {
    /// The edition identifier that was requested.
    pub identifier: String,
    /// Implementation-provided detail.
    pub message: String,
}

/// Contract for the remote metadata source.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Fetches metadata for one edition identifier.
    async fn edition_metadata(&self, identifier: &str) -> Result<EditionMetadata, FetchError>;
}

/// Chooses the format to download from an edition's options.
///
/// Preference order: `epub`, then `pdf`, then the first remaining candidate
/// when neither type is present. Returns `None` only for an empty list.
#[must_use]
pub fn select_download_candidate(formats: &[DownloadFormat]) -> Option<&DownloadFormat> {
    formats
        .iter()
        .find(|f| f.format == "epub")
        .or_else(|| formats.iter().find(|f| f.format == "pdf"))
        .or_else(|| formats.first())
}
