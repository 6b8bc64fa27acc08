//! Per-caller rate gate.
//!
//! The gate owns a [`RateStore`], which holds one fixed-window record per
//! caller. The default store lives in process memory; with the `redis` feature
//! the table can live in Redis and be shared by several gateway instances.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::{InMemoryRateStore, RateRecord};
#[cfg(feature = "redis")]
pub use redis_store::RedisRateStore;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::identity::CallerIdentity;
use crate::metrics::{RATE_LIMITED, RATE_TABLE_SIZE};

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Ceiling of the window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Time until the caller's window ends.
    pub reset_after: Duration,
}

impl RateDecision {
    /// Wall-clock moment the current window ends.
    pub fn reset_at(&self) -> DateTime<Utc> {
        Utc::now() + TimeDelta::from_std(self.reset_after).unwrap_or(TimeDelta::zero())
    }
}

/// Storage behind the gate. Every `hit` is one atomic read-modify-write per key.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Counts one request for `key` and decides whether it fits in the window.
    async fn hit(&self, key: &str, ceiling: u32, window: Duration) -> Result<RateDecision>;

    /// Drops records whose window has ended. Returns how many were dropped.
    async fn sweep(&self) -> usize;

    /// Records currently held, when the store can tell cheaply.
    fn tracked(&self) -> Option<usize>;
}

/// Admits or rejects callers: at most `ceiling` requests per `window`.
pub struct RateGate {
    store: Arc<dyn RateStore>,
    ceiling: u32,
    window: Duration,
}

impl RateGate {
    pub fn new(store: Arc<dyn RateStore>, ceiling: u32, window: Duration) -> Self {
        Self {
            store,
            ceiling,
            window,
        }
    }

    /// Gate backed by a fresh in-memory table.
    pub fn in_memory(ceiling: u32, window: Duration) -> Self {
        Self::new(Arc::new(InMemoryRateStore::new()), ceiling, window)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Always returns a decision. A failing store admits the request.
    pub async fn admit(&self, identity: &CallerIdentity) -> RateDecision {
        let decision = match self.store.hit(&identity.key(), self.ceiling, self.window).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(%err, caller = %identity, "rate store unavailable, admitting request");
                RateDecision {
                    allowed: true,
                    limit: self.ceiling,
                    remaining: self.ceiling.saturating_sub(1),
                    reset_after: self.window,
                }
            }
        };

        if !decision.allowed {
            RATE_LIMITED.inc();
            debug!(caller = %identity, reset_after = ?decision.reset_after, "caller over ceiling");
        }
        if let Some(size) = self.store.tracked() {
            RATE_TABLE_SIZE.set(size as f64);
        }
        decision
    }

    pub async fn sweep(&self) -> usize {
        let dropped = self.store.sweep().await;
        if let Some(size) = self.store.tracked() {
            RATE_TABLE_SIZE.set(size as f64);
        }
        dropped
    }
}

// Reclaims expired records - runs for the lifetime of the server
pub async fn sweeper(gate: Arc<RateGate>, every: Duration) {
    let mut interval = interval(every);
    info!(interval = ?every, "rate table sweeper started");

    loop {
        interval.tick().await;
        let dropped = gate.sweep().await;
        if dropped > 0 {
            debug!(dropped, "expired rate records reclaimed");
        }
    }
}
