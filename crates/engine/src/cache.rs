//! Freshness cache for condition query results.
//!
//! TTL is supplied on every lookup rather than stored with the entry, so a
//! configuration change applies immediately to data already cached. Stale
//! entries are not evicted; the next `put` for the same condition overwrites
//! them.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub condition_id: String,
    pub result: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Fresh while strictly younger than `ttl`. Entries stamped in the
    /// future (clock skew) count as fresh.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.fetched_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }
}

/// One entry per condition id.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached symbols for `condition_id` if fetched less than `ttl` ago.
    pub async fn get(&self, condition_id: &str, ttl: Duration) -> Option<Vec<String>> {
        self.get_at(condition_id, ttl, Utc::now()).await
    }

    pub async fn get_at(
        &self,
        condition_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Option<Vec<String>> {
        let entries = self.entries.read().await;
        entries
            .get(condition_id)
            .filter(|entry| entry.is_fresh(ttl, now))
            .map(|entry| entry.result.clone())
    }

    /// Unconditionally replace the entry for `condition_id`.
    pub async fn put(&self, condition_id: &str, result: Vec<String>, fetched_at: DateTime<Utc>) {
        self.entries.write().await.insert(
            condition_id.to_string(),
            CacheEntry {
                condition_id: condition_id.to_string(),
                result,
                fetched_at,
            },
        );
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_entry_is_served() {
        let cache = ResultCache::new();
        cache.put("0", vec!["005930".into()], Utc::now()).await;

        let hit = cache.get("0", Duration::from_secs(60)).await;
        assert_eq!(hit, Some(vec!["005930".to_string()]));
    }

    #[tokio::test]
    async fn stale_entry_is_a_miss_but_not_evicted() {
        let cache = ResultCache::new();
        let fetched_at = Utc::now() - chrono::Duration::seconds(120);
        cache.put("0", vec!["005930".into()], fetched_at).await;

        assert_eq!(cache.get("0", Duration::from_secs(60)).await, None);
        assert_eq!(cache.len().await, 1);
        // A longer TTL applies to the same stored data immediately.
        assert!(cache.get("0", Duration::from_secs(300)).await.is_some());
    }

    #[tokio::test]
    async fn age_equal_to_ttl_is_stale() {
        let cache = ResultCache::new();
        let now = Utc::now();
        cache.put("0", vec![], now - chrono::Duration::seconds(60)).await;
        assert_eq!(cache.get_at("0", Duration::from_secs(60), now).await, None);
    }

    #[tokio::test]
    async fn put_overwrites_previous_result() {
        let cache = ResultCache::new();
        cache.put("0", vec!["A".into()], Utc::now()).await;
        cache.put("0", vec!["B".into(), "C".into()], Utc::now()).await;

        let hit = cache.get("0", Duration::from_secs(60)).await;
        assert_eq!(hit, Some(vec!["B".to_string(), "C".to_string()]));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn clear_drops_every_entry() {
        let cache = ResultCache::new();
        cache.put("0", vec!["A".into()], Utc::now()).await;
        cache.put("1", vec![], Utc::now()).await;

        cache.clear().await;
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.get("0", Duration::from_secs(60)).await, None);
    }

    #[tokio::test]
    async fn unknown_condition_is_a_miss() {
        let cache = ResultCache::new();
        assert!(cache.get("missing", Duration::from_secs(60)).await.is_none());
        assert_eq!(cache.len().await, 0);
    }
}
