//! Deduplication cache for at-least-once delivered messages.
//!
//! The transport redelivers webhook events until acknowledged, so the same
//! message id can arrive more than once. Entries live for a fixed window
//! (default 5 minutes); the table is also capped by absolute size with the
//! oldest entries purged first.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Time-windowed, size-capped cache of recently seen message ids.
pub struct DedupCache {
    inner: Mutex<Inner>,
    window: Duration,
    max_entries: usize,
}

struct Inner {
    seen: HashMap<String, DateTime<Utc>>,
    // Insertion order; entries are stale when their stamp no longer matches
    // the map (the id was purged and reinserted).
    order: VecDeque<(String, DateTime<Utc>)>,
}

impl DedupCache {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                order: VecDeque::new(),
            }),
            window,
            max_entries,
        }
    }

    /// Record a message id. Returns `true` if this is the first sighting
    /// within the window (process it), `false` for a duplicate (drop it).
    pub async fn check_and_insert(&self, message_id: &str) -> bool {
        self.check_and_insert_at(message_id, Utc::now()).await
    }

    /// Clock-injected variant used by tests.
    pub async fn check_and_insert_at(&self, message_id: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().await;
        self.purge(&mut inner, now);

        if let Some(first_seen) = inner.seen.get(message_id) {
            debug!(message_id, %first_seen, "Duplicate message dropped");
            return false;
        }

        inner.seen.insert(message_id.to_string(), now);
        inner.order.push_back((message_id.to_string(), now));

        while inner.seen.len() > self.max_entries {
            self.evict_oldest(&mut inner);
        }
        true
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn purge(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        while let Some((id, stamp)) = inner.order.front() {
            let live = inner.seen.get(id) == Some(stamp);
            if live && now.signed_duration_since(*stamp) <= window {
                break;
            }
            if live {
                inner.seen.remove(id.as_str());
            }
            inner.order.pop_front();
        }
    }

    fn evict_oldest(&self, inner: &mut Inner) {
        while let Some((id, stamp)) = inner.order.pop_front() {
            if inner.seen.get(&id) == Some(&stamp) {
                inner.seen.remove(&id);
                debug!(message_id = %id, "Dedup entry evicted (size cap)");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(window_secs: u64, max: usize) -> DedupCache {
        DedupCache::new(Duration::from_secs(window_secs), max)
    }

    #[tokio::test]
    async fn second_sighting_within_window_is_duplicate() {
        let cache = cache(300, 100);
        assert!(cache.check_and_insert("wamid.1").await);
        assert!(!cache.check_and_insert("wamid.1").await);
        assert!(cache.check_and_insert("wamid.2").await);
    }

    #[tokio::test]
    async fn id_is_fresh_again_after_window_elapses() {
        let cache = cache(300, 100);
        let t0 = Utc::now();
        assert!(cache.check_and_insert_at("wamid.1", t0).await);

        let inside = t0 + chrono::Duration::seconds(299);
        assert!(!cache.check_and_insert_at("wamid.1", inside).await);

        let outside = t0 + chrono::Duration::seconds(301);
        assert!(cache.check_and_insert_at("wamid.1", outside).await);
    }

    #[tokio::test]
    async fn size_cap_evicts_oldest_first() {
        let cache = cache(300, 3);
        let t0 = Utc::now();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            let t = t0 + chrono::Duration::milliseconds(i as i64);
            assert!(cache.check_and_insert_at(id, t).await);
        }
        assert_eq!(cache.len().await, 3);
        // "a" was evicted, so it is processable again
        assert!(cache.check_and_insert_at("a", t0 + chrono::Duration::seconds(1)).await);
        // "d" is still cached
        assert!(!cache.check_and_insert_at("d", t0 + chrono::Duration::seconds(1)).await);
    }

    #[tokio::test]
    async fn reinsert_after_expiry_does_not_corrupt_order() {
        let cache = cache(10, 100);
        let t0 = Utc::now();
        assert!(cache.check_and_insert_at("x", t0).await);
        let later = t0 + chrono::Duration::seconds(11);
        assert!(cache.check_and_insert_at("x", later).await);
        assert!(!cache.check_and_insert_at("x", later).await);
        assert_eq!(cache.len().await, 1);
    }
}
