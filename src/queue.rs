//! Deferred refreshes collected during one request

use crate::aggregator::Aggregator;
use crate::models::ItemKey;
use std::collections::HashSet;
use tracing::{debug, warn};

/// An item waiting for a refresh pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub key: ItemKey,
    pub url: String,
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Items refreshed and written
    pub refreshed: usize,
    /// Items left alone because counting is disabled
    pub skipped: usize,
    /// Items whose refresh failed
    pub failed: usize,
    /// Failed items kept queued for another flush
    pub retained: usize,
}

/// Set of items to refresh once the current request is done.
///
/// Enqueueing is idempotent and items are flushed in insertion order. The queue
/// lives only as long as its request context; anything still queued when the
/// context is dropped is picked up again by the next stale read.
#[derive(Debug, Default)]
pub struct RefreshQueue {
    items: Vec<QueuedItem>,
    keys: HashSet<ItemKey>,
}

impl RefreshQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` for a refresh at `url`
    ///
    /// # Returns
    /// `true` if the item was added, `false` if it was already queued
    pub fn enqueue(&mut self, key: ItemKey, url: impl Into<String>) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        let url = url.into();
        debug!("Queued item={} url={} for refresh", key, url);
        self.items.push(QueuedItem { key, url });
        true
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[QueuedItem] {
        &self.items
    }

    /// Refresh every queued item once.
    ///
    /// Items leave the queue whether or not their refresh worked, except for
    /// transient (storage) failures which stay queued. One failure does not
    /// stop the remaining items.
    pub async fn flush(&mut self, aggregator: &Aggregator) -> FlushReport {
        let items = std::mem::take(&mut self.items);
        self.keys.clear();

        let mut report = FlushReport::default();
        for item in items {
            match aggregator.refresh_url(&item.key, &item.url).await {
                Ok(Some(_)) => report.refreshed += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    if e.is_transient() {
                        warn!("Keeping item={} queued after failed refresh: {}", item.key, e);
                        report.retained += 1;
                        self.enqueue(item.key, item.url);
                    }
                }
            }
        }

        if report.refreshed + report.failed > 0 {
            debug!(
                "Flushed refresh queue refreshed={} skipped={} failed={} retained={}",
                report.refreshed, report.skipped, report.failed, report.retained
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CountSource, CountsConfig};
    use crate::content::ContentCatalog;
    use crate::error::{CountError, Result};
    use crate::hooks::DefaultHooks;
    use crate::metrics::CountMetrics;
    use crate::store::{CountStore, StoreBackend};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct ReadOnlyBackend;

    #[async_trait]
    impl StoreBackend for ReadOnlyBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: String) -> Result<()> {
            Err(CountError::storage("read-only"))
        }

        async fn keys(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    fn aggregator(count_source: CountSource, store: CountStore) -> Aggregator {
        let config = CountsConfig {
            count_source,
            ..CountsConfig::default()
        };
        Aggregator::new(
            Arc::new(config),
            store,
            Arc::new(ContentCatalog::default()),
            Arc::new(DefaultHooks),
            CountMetrics::new().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut queue = RefreshQueue::new();
        assert!(queue.enqueue(ItemKey::Content(1), "https://example.com/one/"));
        assert!(queue.enqueue(ItemKey::Site, "https://example.com/"));
        assert!(!queue.enqueue(ItemKey::Content(1), "https://example.com/one/"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.items()[0].key, ItemKey::Content(1));
        assert_eq!(queue.items()[1].key, ItemKey::Site);
        assert!(queue.contains(&ItemKey::Site));
    }

    #[tokio::test]
    async fn test_flush_with_counting_disabled() {
        let aggregator = aggregator(CountSource::None, CountStore::memory());
        let mut queue = RefreshQueue::new();
        queue.enqueue(ItemKey::Content(1), "https://example.com/one/");

        let report = queue.flush(&aggregator).await;
        assert_eq!(report.skipped, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_flush_refreshes_in_order() {
        let store = CountStore::memory();
        // native mode without services queries nothing and stores defaults
        let aggregator = aggregator(CountSource::Native, store.clone());
        let mut queue = RefreshQueue::new();
        queue.enqueue(ItemKey::Url("https://example.com/a".to_string()), "https://example.com/a");
        queue.enqueue(ItemKey::Content(3), "https://example.com/three/");

        let report = queue.flush(&aggregator).await;
        assert_eq!(report.refreshed, 2);
        assert!(queue.is_empty());
        assert!(store.get_url("https://example.com/a").await.unwrap().is_some());
        assert!(store.get(3).await.unwrap().unwrap().last_updated.is_some());
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_item_queued() {
        let aggregator = aggregator(CountSource::Native, CountStore::new(Arc::new(ReadOnlyBackend)));
        let mut queue = RefreshQueue::new();
        queue.enqueue(ItemKey::Site, "https://example.com/");

        let report = queue.flush(&aggregator).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.retained, 1);
        assert!(queue.contains(&ItemKey::Site));

        // a second flush retries it
        let report = queue.flush(&aggregator).await;
        assert_eq!(report.retained, 1);
    }
}
