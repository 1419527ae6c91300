//! Persistent book metadata store.
//!
//! [`BookStore`] persists one row per edition identifier and publishes a
//! [`ChangeBatch`] on the shared [`ChangeFeed`] after every successful
//! mutation. Loaded entities always come back in the `Fault` state; callers
//! reconcile them against the filesystem (see
//! [`DownloadEngine::reconcile_on_load`](crate::download::DownloadEngine::reconcile_on_load))
//! before handing them to anything that observes state.
//!
//! Store failures surface synchronously as [`PersistenceError`]; nothing here
//! retries automatically.

mod feed;

use std::sync::Arc;

use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::book::BookEntity;
use crate::db::Database;

pub use feed::{ChangeBatch, ChangeFeed, SubscriptionId};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored source URL no longer parses. Indicates store corruption.
    #[error("invalid source URL stored for {identifier}: {url}")]
    InvalidStoredUrl {
        /// Identifier of the corrupt row.
        identifier: String,
        /// The unparseable URL text.
        url: String,
    },
}

/// Raw row shape; converted into [`BookEntity`] after URL validation.
#[derive(Debug, FromRow)]
struct BookRow {
    identifier: String,
    title: Option<String>,
    authors: Option<String>,
    cover: Option<Vec<u8>>,
    source_url: String,
}

impl BookRow {
    fn into_entity(self) -> Result<BookEntity, PersistenceError> {
        let source_url =
            Url::parse(&self.source_url).map_err(|_| PersistenceError::InvalidStoredUrl {
                identifier: self.identifier.clone(),
                url: self.source_url.clone(),
            })?;
        Ok(BookEntity::new(
            self.identifier,
            self.title,
            self.authors,
            self.cover,
            source_url,
        ))
    }
}

const SELECT_COLUMNS: &str = "identifier, title, authors, cover, source_url";

/// Metadata store for book entities, keyed by edition identifier.
#[derive(Debug, Clone)]
pub struct BookStore {
    db: Database,
    feed: Arc<ChangeFeed>,
}

impl BookStore {
    /// Creates a store over `db`, publishing changes on `feed`.
    #[must_use]
    pub fn new(db: Database, feed: Arc<ChangeFeed>) -> Self {
        Self { db, feed }
    }

    /// The change feed this store publishes on.
    #[must_use]
    pub fn feed(&self) -> &Arc<ChangeFeed> {
        &self.feed
    }

    /// Inserts a new entity and publishes an `inserted` batch.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] on failure, including a
    /// primary-key violation when the identifier already exists (the
    /// uniqueness invariant).
    #[instrument(skip(self, entity), fields(identifier = %entity.identifier()))]
    pub async fn insert(&self, entity: &BookEntity) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO books (identifier, title, authors, cover, source_url)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(entity.identifier())
        .bind(entity.title())
        .bind(entity.authors())
        .bind(entity.cover())
        .bind(entity.source_url().as_str())
        .execute(self.db.pool())
        .await?;

        debug!("book inserted");
        self.feed.publish(&ChangeBatch::inserted(entity.clone()));
        Ok(())
    }

    /// Fetches one entity by identifier, in the `Fault` state.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on database failure or a corrupt stored
    /// URL.
    pub async fn fetch_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<BookEntity>, PersistenceError> {
        let row: Option<BookRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM books WHERE identifier = ?"
        ))
        .bind(identifier)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(BookRow::into_entity).transpose()
    }

    /// Fetches every entity ordered by title, all in the `Fault` state.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] on database failure or a corrupt stored
    /// URL.
    pub async fn fetch_all_sorted_by_title(&self) -> Result<Vec<BookEntity>, PersistenceError> {
        let rows: Vec<BookRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM books ORDER BY title"
        ))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(BookRow::into_entity).collect()
    }

    /// Rewrites an entity's metadata row and publishes an `updated` batch.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] on failure; the caller decides
    /// whether to retry (this core never does automatically).
    #[instrument(skip(self, entity), fields(identifier = %entity.identifier()))]
    pub async fn save(&self, entity: &BookEntity) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE books SET title = ?, authors = ?, cover = ?, source_url = ?
             WHERE identifier = ?",
        )
        .bind(entity.title())
        .bind(entity.authors())
        .bind(entity.cover())
        .bind(entity.source_url().as_str())
        .bind(entity.identifier())
        .execute(self.db.pool())
        .await?;

        self.feed.publish(&ChangeBatch::updated(entity.clone()));
        Ok(())
    }

    /// Deletes an entity's record and publishes a `deleted` batch.
    ///
    /// Callers must run
    /// [`cancel_on_deletion`](crate::download::DownloadEngine::cancel_on_deletion)
    /// first so no transfer outlives its record.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Database`] on failure.
    #[instrument(skip(self, entity), fields(identifier = %entity.identifier()))]
    pub async fn delete(&self, entity: &BookEntity) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM books WHERE identifier = ?")
            .bind(entity.identifier())
            .execute(self.db.pool())
            .await?;

        debug!("book deleted");
        self.feed.publish(&ChangeBatch::deleted(entity.clone()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_store() -> BookStore {
        let db = Database::new_in_memory().await.unwrap();
        BookStore::new(db, Arc::new(ChangeFeed::new()))
    }

    fn book(identifier: &str, title: &str) -> BookEntity {
        BookEntity::new(
            identifier,
            Some(title.to_string()),
            Some("Author".to_string()),
            Some(vec![0x89, 0x50]),
            Url::parse("https://archive.example/b.epub").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_insert_and_fetch_round_trip() {
        let store = test_store().await;
        store.insert(&book("OL1M", "Dune")).await.unwrap();

        let loaded = store.fetch_by_identifier("OL1M").await.unwrap().unwrap();
        assert_eq!(loaded.identifier(), "OL1M");
        assert_eq!(loaded.title(), Some("Dune"));
        assert_eq!(loaded.authors(), Some("Author"));
        assert_eq!(loaded.cover(), Some(&[0x89u8, 0x50][..]));
        // Live state is never persisted; loads start at fault.
        assert!(loaded.state().is_fault());
    }

    #[tokio::test]
    async fn test_fetch_unknown_identifier_is_none() {
        let store = test_store().await;
        assert!(store.fetch_by_identifier("OL404M").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = test_store().await;
        store.insert(&book("OL1M", "Dune")).await.unwrap();

        let result = store.insert(&book("OL1M", "Dune again")).await;
        assert!(matches!(result, Err(PersistenceError::Database(_))));
    }

    #[tokio::test]
    async fn test_fetch_all_sorted_by_title() {
        let store = test_store().await;
        store.insert(&book("OL2M", "Zebra")).await.unwrap();
        store.insert(&book("OL1M", "Aardvark")).await.unwrap();

        let all = store.fetch_all_sorted_by_title().await.unwrap();
        let titles: Vec<_> = all.iter().map(|b| b.title().unwrap()).collect();
        assert_eq!(titles, ["Aardvark", "Zebra"]);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let store = test_store().await;
        let entity = book("OL1M", "Dune");
        store.insert(&entity).await.unwrap();
        store.delete(&entity).await.unwrap();

        assert!(store.fetch_by_identifier("OL1M").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutations_publish_change_batches() {
        let db = Database::new_in_memory().await.unwrap();
        let feed = Arc::new(ChangeFeed::new());
        let store = BookStore::new(db, Arc::clone(&feed));

        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log_cb = Arc::clone(&log);
        feed.subscribe(move |batch| {
            let mut log = log_cb.lock().unwrap();
            for b in &batch.inserted {
                log.push(format!("insert:{}", b.identifier()));
            }
            for b in &batch.updated {
                log.push(format!("update:{}", b.identifier()));
            }
            for b in &batch.deleted {
                log.push(format!("delete:{}", b.identifier()));
            }
        });

        let entity = book("OL1M", "Dune");
        store.insert(&entity).await.unwrap();
        store.save(&entity).await.unwrap();
        store.delete(&entity).await.unwrap();

        assert_eq!(
            &*log.lock().unwrap(),
            &["insert:OL1M", "update:OL1M", "delete:OL1M"]
        );
    }
}
