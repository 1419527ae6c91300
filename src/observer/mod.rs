//! Per-identifier observation of store changes.
//!
//! A [`BookObserver`] narrows the store's global [`ChangeFeed`] down to one
//! edition identifier and fans matching changes out to registered callbacks.
//! UI layers register callbacks and react to engine-driven transitions
//! without polling the store.

use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::book::BookEntity;
use crate::store::{ChangeBatch, ChangeFeed, SubscriptionId};

/// Callback invoked with the matching entity snapshot.
pub type BookHandler = Box<dyn Fn(&BookEntity) + Send + Sync>;

#[derive(Default)]
struct HandlerSet {
    insert: Vec<BookHandler>,
    change: Vec<BookHandler>,
    delete: Vec<BookHandler>,
}

/// Watches the change feed for one identifier.
///
/// Registration methods return the observer for chaining; every callback of a
/// kind fires for every matching batch, in registration order.
/// `subscribe`/`unsubscribe` bracket the observer's lifetime; teardown is
/// idempotent and also runs on drop, so an abruptly discarded observer never
/// leaves a dangling feed callback.
pub struct BookObserver {
    identifier: String,
    feed: Arc<ChangeFeed>,
    handlers: Arc<Mutex<HandlerSet>>,
    subscription: Option<SubscriptionId>,
}

impl BookObserver {
    /// Creates an unsubscribed observer for `identifier`.
    #[must_use]
    pub fn new(identifier: impl Into<String>, feed: Arc<ChangeFeed>) -> Self {
        Self {
            identifier: identifier.into(),
            feed,
            handlers: Arc::new(Mutex::new(HandlerSet::default())),
            subscription: None,
        }
    }

    /// The identifier this observer watches.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Registers a callback for inserts of the watched entity.
    pub fn on_insert(&mut self, handler: impl Fn(&BookEntity) + Send + Sync + 'static) -> &mut Self {
        self.lock_handlers().insert.push(Box::new(handler));
        self
    }

    /// Registers a callback for updates (record or live state) of the
    /// watched entity.
    pub fn on_change(&mut self, handler: impl Fn(&BookEntity) + Send + Sync + 'static) -> &mut Self {
        self.lock_handlers().change.push(Box::new(handler));
        self
    }

    /// Registers a callback for deletion of the watched entity.
    pub fn on_delete(&mut self, handler: impl Fn(&BookEntity) + Send + Sync + 'static) -> &mut Self {
        self.lock_handlers().delete.push(Box::new(handler));
        self
    }

    /// Attaches the observer to the feed. No-op when already subscribed.
    ///
    /// Must be established before any engine operation whose changes should
    /// be observed.
    pub fn subscribe(&mut self) {
        if self.subscription.is_some() {
            return;
        }

        let identifier = self.identifier.clone();
        let handlers = Arc::clone(&self.handlers);
        let id = self.feed.subscribe(move |batch| {
            dispatch_batch(&identifier, &handlers, batch);
        });
        self.subscription = Some(id);
    }

    /// Detaches the observer from the feed. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.feed.unsubscribe(id);
        }
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HandlerSet> {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for BookObserver {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for BookObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookObserver")
            .field("identifier", &self.identifier)
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}

/// Selects at most one entity matching `identifier` from `books`.
///
/// More than one match in a single batch violates the uniqueness invariant;
/// that is reported and the first match used, never a crash.
fn first_match<'a>(identifier: &str, books: &'a [BookEntity]) -> Option<&'a BookEntity> {
    let mut matches = books.iter().filter(|b| b.identifier() == identifier);
    let first = matches.next()?;
    if matches.next().is_some() {
        warn!(
            identifier = %identifier,
            "multiple entities share one identifier in a change batch"
        );
    }
    Some(first)
}

fn dispatch_batch(identifier: &str, handlers: &Arc<Mutex<HandlerSet>>, batch: &ChangeBatch) {
    let handlers = handlers
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(book) = first_match(identifier, &batch.updated) {
        for handler in &handlers.change {
            handler(book);
        }
    }

    if let Some(book) = first_match(identifier, &batch.deleted) {
        for handler in &handlers.delete {
            handler(book);
        }
    }

    if let Some(book) = first_match(identifier, &batch.inserted) {
        for handler in &handlers.insert {
            handler(book);
        }
    }
}
