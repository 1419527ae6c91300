//! Open Book Core Library
//!
//! This library provides the core of the Open Book client: the book download
//! lifecycle and the local persistence/observation layer that keeps UI state
//! synchronized with asynchronous network and filesystem work.
//!
//! # Architecture
//!
//! - [`book`] - Book entity and its transient download state
//! - [`db`] - SQLite connection and schema management
//! - [`download`] - Transfer subsystem and the download state machine
//! - [`fetcher`] - Consumed metadata-fetcher contract and format selection
//! - [`library`] - Lifecycle glue and the owner-context event pump
//! - [`observer`] - Per-identifier observation of store changes
//! - [`storage`] - Deterministic temp/permanent path layout
//! - [`store`] - Persistent metadata store and its change feed
//!
//! A book's download moves `Fault -> InProgress -> Downloaded` (or back to
//! `Fault` on failure or cancellation), driven entirely by the engine on one
//! owner context. "Downloaded" survives restarts because the file at the
//! permanent path is the durable record, not a stored state value.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod book;
pub mod db;
pub mod download;
pub mod fetcher;
pub mod library;
pub mod observer;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use book::{BookEntity, DownloadProgress, DownloadState};
pub use db::{Database, DbError};
pub use download::{
    DownloadEngine, EngineError, TOTAL_BYTES_UNKNOWN, TransferError, TransferEvent, TransferHandle,
};
pub use fetcher::{
    DownloadFormat, EditionMetadata, FetchError, MetadataFetcher, select_download_candidate,
};
pub use library::{DownloadRequest, Library, LibraryError};
pub use observer::BookObserver;
pub use storage::{StorageConfig, StorageError};
pub use store::{BookStore, ChangeBatch, ChangeFeed, PersistenceError, SubscriptionId};
