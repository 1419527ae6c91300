//! Change-notification feed for the book store.
//!
//! Every mutating store operation, and every engine-driven state transition,
//! publishes a [`ChangeBatch`] describing what was inserted, updated, or
//! deleted. Subscribers receive batches scoped to the full entity set;
//! narrowing to one identifier is the observer's job, not the feed's.
//!
//! `subscribe` returns an unsubscribe handle and `unsubscribe` is a safe
//! no-op for an already-removed subscription.

use std::sync::{Arc, Mutex};

use crate::book::BookEntity;

/// One batch of changes emitted after a mutating operation.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    /// Entities newly inserted into the store.
    pub inserted: Vec<BookEntity>,
    /// Entities whose record or live state changed.
    pub updated: Vec<BookEntity>,
    /// Entities removed from the store.
    pub deleted: Vec<BookEntity>,
}

impl ChangeBatch {
    /// Batch describing a single insert.
    #[must_use]
    pub fn inserted(book: BookEntity) -> Self {
        Self {
            inserted: vec![book],
            ..Self::default()
        }
    }

    /// Batch describing a single update (record or live state).
    #[must_use]
    pub fn updated(book: BookEntity) -> Self {
        Self {
            updated: vec![book],
            ..Self::default()
        }
    }

    /// Batch describing a single delete.
    #[must_use]
    pub fn deleted(book: BookEntity) -> Self {
        Self {
            deleted: vec![book],
            ..Self::default()
        }
    }
}

/// Handle returned by [`ChangeFeed::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type FeedCallback = Arc<dyn Fn(&ChangeBatch) + Send + Sync>;

#[derive(Default)]
struct FeedInner {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, FeedCallback)>,
}

/// Publish/subscribe hub for store change notifications.
///
/// Callbacks run synchronously on the publishing context, in subscription
/// order. The subscriber list is snapshotted before invocation, so a callback
/// may unsubscribe (itself included) without deadlocking; such a removal
/// takes effect from the next publish.
#[derive(Default)]
pub struct ChangeFeed {
    inner: Mutex<FeedInner>,
}

impl ChangeFeed {
    /// Creates an empty feed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for every published batch.
    pub fn subscribe(
        &self,
        callback: impl Fn(&ChangeBatch) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Removes a subscription. No-op if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .subscribers
            .len()
    }

    /// Delivers a batch to every subscriber in subscription order.
    pub fn publish(&self, batch: &ChangeBatch) {
        let callbacks: Vec<FeedCallback> = {
            let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            inner
                .subscribers
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };

        for callback in callbacks {
            callback(batch);
        }
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use url::Url;

    fn book(identifier: &str) -> BookEntity {
        BookEntity::new(
            identifier,
            None,
            None,
            None,
            Url::parse("https://archive.example/b.epub").unwrap(),
        )
    }

    #[test]
    fn test_subscribers_receive_batches_in_order() {
        let feed = ChangeFeed::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            feed.subscribe(move |_| order.lock().unwrap().push(tag));
        }

        feed.publish(&ChangeBatch::inserted(book("OL1M")));
        assert_eq!(&*order.lock().unwrap(), &["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let feed = ChangeFeed::new();
        let count = Arc::new(Mutex::new(0usize));
        let count_cb = Arc::clone(&count);
        let id = feed.subscribe(move |_| *count_cb.lock().unwrap() += 1);

        feed.unsubscribe(id);
        feed.unsubscribe(id); // safe no-op
        assert_eq!(feed.subscriber_count(), 0);

        feed.publish(&ChangeBatch::updated(book("OL1M")));
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_without_deadlock() {
        let feed = Arc::new(ChangeFeed::new());
        let id_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let feed_cb = Arc::clone(&feed);
        let id_slot_cb = Arc::clone(&id_slot);
        let id = feed.subscribe(move |_| {
            if let Some(id) = id_slot_cb.lock().unwrap().take() {
                feed_cb.unsubscribe(id);
            }
        });
        *id_slot.lock().unwrap() = Some(id);

        feed.publish(&ChangeBatch::deleted(book("OL1M")));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_batch_constructors_populate_one_kind() {
        let batch = ChangeBatch::updated(book("OL1M"));
        assert!(batch.inserted.is_empty());
        assert_eq!(batch.updated.len(), 1);
        assert!(batch.deleted.is_empty());
    }
}
