//! Integration tests for the store, change feed, and observer working
//! together: engine-free paths that exercise persistence and notification.

use std::sync::{Arc, Mutex};

use openbook_core::{BookEntity, BookObserver, BookStore, ChangeFeed, Database};
use url::Url;

async fn setup_store() -> (BookStore, Arc<ChangeFeed>) {
    let feed = Arc::new(ChangeFeed::new());
    let db = Database::new_in_memory().await.expect("in-memory db");
    (BookStore::new(db, Arc::clone(&feed)), feed)
}

fn book(identifier: &str, title: &str) -> BookEntity {
    BookEntity::new(
        identifier,
        Some(title.to_string()),
        Some("Author".to_string()),
        None,
        Url::parse("https://archive.example/book.epub").expect("url"),
    )
}

#[tokio::test]
async fn test_observer_receives_insert_from_store() {
    let (store, feed) = setup_store().await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut observer = BookObserver::new("OL1M", Arc::clone(&feed));
    let seen_cb = Arc::clone(&seen);
    observer.on_insert(move |b| {
        seen_cb
            .lock()
            .unwrap()
            .push((b.identifier().to_string(), b.state().is_fault()));
    });
    observer.subscribe();

    store.insert(&book("OL1M", "Dune")).await.expect("insert");
    store.insert(&book("OL2M", "Other")).await.expect("insert");

    // Only the watched identifier is delivered, with its initial state.
    assert_eq!(&*seen.lock().unwrap(), &[("OL1M".to_string(), true)]);
}

#[tokio::test]
async fn test_observer_receives_save_as_change() {
    let (store, feed) = setup_store().await;
    let entity = book("OL1M", "Dune");
    store.insert(&entity).await.expect("insert");

    let changes = Arc::new(Mutex::new(0usize));
    let mut observer = BookObserver::new("OL1M", Arc::clone(&feed));
    let changes_cb = Arc::clone(&changes);
    observer.on_change(move |_| *changes_cb.lock().unwrap() += 1);
    observer.subscribe();

    store.save(&entity).await.expect("save");
    assert_eq!(*changes.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_observer_receives_delete() {
    let (store, feed) = setup_store().await;
    let entity = book("OL1M", "Dune");
    store.insert(&entity).await.expect("insert");

    let deletes = Arc::new(Mutex::new(Vec::new()));
    let mut observer = BookObserver::new("OL1M", Arc::clone(&feed));
    let deletes_cb = Arc::clone(&deletes);
    observer.on_delete(move |b| deletes_cb.lock().unwrap().push(b.identifier().to_string()));
    observer.subscribe();

    store.delete(&entity).await.expect("delete");
    assert_eq!(&*deletes.lock().unwrap(), &["OL1M".to_string()]);
}

#[tokio::test]
async fn test_unsubscribed_observer_receives_nothing() {
    let (store, feed) = setup_store().await;

    let count = Arc::new(Mutex::new(0usize));
    let mut observer = BookObserver::new("OL1M", Arc::clone(&feed));
    let count_cb = Arc::clone(&count);
    observer.on_insert(move |_| *count_cb.lock().unwrap() += 1);
    observer.subscribe();
    observer.unsubscribe();

    store.insert(&book("OL1M", "Dune")).await.expect("insert");
    assert_eq!(*count.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_fetch_all_orders_by_title_across_inserts() {
    let (store, _feed) = setup_store().await;
    for (identifier, title) in [("OL3M", "Middlemarch"), ("OL1M", "Aurora"), ("OL2M", "Zeno")] {
        store.insert(&book(identifier, title)).await.expect("insert");
    }

    let titles: Vec<String> = store
        .fetch_all_sorted_by_title()
        .await
        .expect("fetch all")
        .iter()
        .map(|b| b.title().expect("title").to_string())
        .collect();
    assert_eq!(titles, ["Aurora", "Middlemarch", "Zeno"]);
}

#[tokio::test]
async fn test_two_observers_for_different_identifiers() {
    let (store, feed) = setup_store().await;

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut observer_a = BookObserver::new("OL1M", Arc::clone(&feed));
    let log_a = Arc::clone(&log);
    observer_a.on_insert(move |b| log_a.lock().unwrap().push(format!("a:{}", b.identifier())));
    observer_a.subscribe();

    let mut observer_b = BookObserver::new("OL2M", Arc::clone(&feed));
    let log_b = Arc::clone(&log);
    observer_b.on_insert(move |b| log_b.lock().unwrap().push(format!("b:{}", b.identifier())));
    observer_b.subscribe();

    store.insert(&book("OL2M", "Second")).await.expect("insert");
    store.insert(&book("OL1M", "First")).await.expect("insert");

    assert_eq!(&*log.lock().unwrap(), &["b:OL2M", "a:OL1M"]);
}
