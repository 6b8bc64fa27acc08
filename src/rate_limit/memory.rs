use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{RateDecision, RateStore};
use crate::error::Result;

// Rate record - tracks requests per caller within one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRecord {
    pub count: u32,
    pub window_expiry: Instant,
}

/// Rate table held in process memory.
///
/// Each `hit` runs under the map's shard lock for that key, so concurrent
/// requests from one caller cannot interleave their updates.
#[derive(Debug, Default)]
pub struct InMemoryRateStore {
    records: DashMap<String, RateRecord>,
}

impl InMemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str) -> Option<RateRecord> {
        self.records.get(key).map(|r| *r)
    }

    fn hit_at(&self, key: &str, ceiling: u32, window: Duration, now: Instant) -> RateDecision {
        let mut record = self
            .records
            .entry(key.to_string())
            .or_insert(RateRecord {
                count: 0,
                window_expiry: now + window,
            });

        // window over..? start a new one
        if now >= record.window_expiry {
            record.count = 0;
            record.window_expiry = now + window;
        }

        let reset_after = record.window_expiry.saturating_duration_since(now);

        // under ceiling..? count it and allow
        if record.count < ceiling {
            record.count += 1;
            return RateDecision {
                allowed: true,
                limit: ceiling,
                remaining: ceiling - record.count,
                reset_after,
            };
        }

        // over ceiling, the stored count stays capped
        RateDecision {
            allowed: false,
            limit: ceiling,
            remaining: 0,
            reset_after,
        }
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| now < record.window_expiry);
        before.saturating_sub(self.records.len())
    }
}

#[async_trait]
impl RateStore for InMemoryRateStore {
    async fn hit(&self, key: &str, ceiling: u32, window: Duration) -> Result<RateDecision> {
        Ok(self.hit_at(key, ceiling, window, Instant::now()))
    }

    async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn tracked(&self) -> Option<usize> {
        Some(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::advance;

    const DAY: Duration = Duration::from_secs(86_400);

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_ceiling_then_rejects() {
        let store = InMemoryRateStore::new();
        for expected_remaining in [2, 1, 0] {
            let d = store.hit("X", 3, DAY).await.unwrap();
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
            advance(Duration::from_secs(10)).await;
        }
        let d = store.hit("X", 3, DAY).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_after, DAY - Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_hits_do_not_grow_the_count() {
        let store = InMemoryRateStore::new();
        for _ in 0..10 {
            store.hit("X", 2, DAY).await.unwrap();
        }
        assert_eq!(store.record("X").unwrap().count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_record() {
        let store = InMemoryRateStore::new();
        let window = Duration::from_secs(60);
        store.hit("X", 1, window).await.unwrap();
        assert!(!store.hit("X", 1, window).await.unwrap().allowed);

        advance(window).await;

        let d = store.hit("X", 1, window).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.reset_after, window);
        let record = store.record("X").unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_expiry, Instant::now() + window);
    }

    #[tokio::test(start_paused = true)]
    async fn callers_are_counted_separately() {
        let store = InMemoryRateStore::new();
        assert!(store.hit("a", 1, DAY).await.unwrap().allowed);
        assert!(store.hit("b", 1, DAY).await.unwrap().allowed);
        assert!(!store.hit("a", 1, DAY).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired_records() {
        let store = InMemoryRateStore::new();
        store.hit("old", 3, Duration::from_secs(10)).await.unwrap();
        store.hit("new", 3, Duration::from_secs(100)).await.unwrap();

        advance(Duration::from_secs(10)).await;

        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.tracked(), Some(1));
        assert!(store.record("old").is_none());
        assert!(store.record("new").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_hits_never_exceed_ceiling() {
        let store = Arc::new(InMemoryRateStore::new());
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.hit("same", 10, DAY).await.unwrap().allowed
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(store.record("same").unwrap().count, 10);
    }
}
