//! Lifecycle glue between the store, the engine, and the UI.
//!
//! [`Library`] owns the in-memory working set of [`BookEntity`] values — the
//! single owner context for their state. Creating a download request inserts
//! the entity and starts its transfer; loading reconciles every entity
//! against the filesystem before anything can observe it; deleting cancels
//! the in-flight transfer before the record goes away. The event pump
//! re-dispatches transfer events from worker tasks onto this owner context,
//! which is the only place entity state ever changes.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::book::BookEntity;
use crate::download::{DownloadEngine, EngineError};
use crate::store::{BookStore, PersistenceError};

/// Inputs for creating a new book download.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DownloadRequest {
    /// Edition identifier; becomes the entity's primary key.
    pub identifier: String,
    /// Display title.
    pub title: Option<String>,
    /// Display-joined authors.
    pub authors: Option<String>,
    /// Cover image bytes captured from the detail screen.
    pub cover: Option<Vec<u8>>,
    /// Remote file location. Must be a well-formed absolute URL.
    pub source_url: String,
}

/// Errors from library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// Malformed request input; rejected before any side effect.
    #[error("invalid download request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// An entity already exists for this identifier; callers must reuse it.
    #[error("a book already exists for identifier {identifier}")]
    AlreadyExists {
        /// The conflicting identifier.
        identifier: String,
    },

    /// Store failure, propagated from the triggering call.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Download finalization failure.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The book library: store, engine, and the live entity working set.
#[derive(Debug)]
pub struct Library {
    store: BookStore,
    engine: DownloadEngine,
    books: HashMap<String, BookEntity>,
}

impl Library {
    /// Creates a library over an existing store and engine.
    ///
    /// The store and engine are expected to share one [`ChangeFeed`]
    /// (see [`BookStore::feed`]) so observers see both persisted-record and
    /// live-state changes.
    ///
    /// [`ChangeFeed`]: crate::store::ChangeFeed
    #[must_use]
    pub fn new(store: BookStore, engine: DownloadEngine) -> Self {
        Self {
            store,
            engine,
            books: HashMap::new(),
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &BookStore {
        &self.store
    }

    /// The download engine.
    #[must_use]
    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    /// Loads every stored entity into the working set, reconciling each
    /// against the filesystem before any observer can see it. Books whose
    /// permanent file survived a restart come back `Downloaded`; everything
    /// else starts at `Fault`.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Persistence`] if the fetch fails.
    #[instrument(skip(self))]
    pub async fn load(&mut self) -> Result<(), LibraryError> {
        let entities = self.store.fetch_all_sorted_by_title().await?;
        debug!(count = entities.len(), "loaded books from store");

        self.books.clear();
        for mut entity in entities {
            self.engine.reconcile_on_load(&mut entity);
            self.books.insert(entity.identifier().to_string(), entity);
        }
        Ok(())
    }

    /// Looks up a live entity by identifier.
    #[must_use]
    pub fn book(&self, identifier: &str) -> Option<&BookEntity> {
        self.books.get(identifier)
    }

    /// Iterates over the live working set, in no particular order.
    pub fn books(&self) -> impl Iterator<Item = &BookEntity> {
        self.books.values()
    }

    /// Creates a new entity, persists it, and starts its download.
    ///
    /// Validation happens before any side effect: the source URL must be a
    /// well-formed absolute URL and the identifier must be non-empty and not
    /// already in use.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::InvalidRequest`] for malformed input.
    /// - [`LibraryError::AlreadyExists`] when an entity with the identifier
    ///   exists; reuse it instead.
    /// - [`LibraryError::Persistence`] if the insert fails.
    #[instrument(skip(self, request), fields(identifier = %request.identifier))]
    pub async fn create_download_request(
        &mut self,
        request: DownloadRequest,
    ) -> Result<(), LibraryError> {
        if request.identifier.is_empty() {
            return Err(LibraryError::InvalidRequest {
                reason: "empty identifier".to_string(),
            });
        }
        let source_url =
            Url::parse(&request.source_url).map_err(|e| LibraryError::InvalidRequest {
                reason: format!("malformed source URL {:?}: {e}", request.source_url),
            })?;

        if self.books.contains_key(&request.identifier)
            || self
                .store
                .fetch_by_identifier(&request.identifier)
                .await?
                .is_some()
        {
            return Err(LibraryError::AlreadyExists {
                identifier: request.identifier,
            });
        }

        let mut entity = BookEntity::new(
            request.identifier.clone(),
            request.title,
            request.authors,
            request.cover,
            source_url,
        );

        self.store.insert(&entity).await?;
        self.engine.start_downloading(&mut entity);
        self.books.insert(request.identifier, entity);
        Ok(())
    }

    /// Starts (or retries after `Fault`) the download for a known entity.
    /// No-op for unknown identifiers or non-`Fault` states.
    pub fn start_downloading(&mut self, identifier: &str) {
        if let Some(entity) = self.books.get_mut(identifier) {
            self.engine.start_downloading(entity);
        }
    }

    /// Requests cancellation of an in-progress download. The entity stays
    /// `InProgress` until the cancellation completion event is pumped.
    pub fn stop_downloading(&mut self, identifier: &str) {
        if let Some(entity) = self.books.get(identifier) {
            self.engine.stop_downloading(entity);
        }
    }

    /// Deletes an entity: cancels any in-flight transfer, removes the store
    /// record, and drops it from the working set. The downloaded file, if
    /// any, is left in place; a re-created entity reconciles straight back
    /// to `Downloaded`.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Persistence`] if the store delete fails; the
    /// entity then remains in the working set.
    #[instrument(skip(self))]
    pub async fn delete(&mut self, identifier: &str) -> Result<(), LibraryError> {
        let Some(entity) = self.books.get(identifier) else {
            return Ok(());
        };

        self.engine.cancel_on_deletion(entity);
        self.store.delete(entity).await?;
        self.books.remove(identifier);
        Ok(())
    }

    /// Waits for one transfer event and applies it on this owner context.
    ///
    /// Returns the identifier the event belonged to. An event for an entity
    /// no longer in the working set (deleted mid-transfer) is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Engine`] from completion finalization.
    pub async fn process_next_event(&mut self) -> Result<Option<String>, LibraryError> {
        let Some(event) = self.engine.next_event().await else {
            return Ok(None);
        };

        let identifier = event.identifier().to_string();
        match self.books.get_mut(&identifier) {
            Some(entity) => self.engine.apply_event(entity, event)?,
            None => debug!(identifier = %identifier, "dropping event for deleted entity"),
        }
        Ok(Some(identifier))
    }

    /// Applies every already-queued transfer event without waiting.
    ///
    /// Returns how many events were applied.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Engine`] from completion finalization.
    pub fn drain_events(&mut self) -> Result<usize, LibraryError> {
        let mut applied = 0;
        while let Some(event) = self.engine.try_next_event() {
            let identifier = event.identifier().to_string();
            match self.books.get_mut(&identifier) {
                Some(entity) => self.engine.apply_event(entity, event)?,
                None => debug!(identifier = %identifier, "dropping event for deleted entity"),
            }
            applied += 1;
        }
        Ok(applied)
    }
}
