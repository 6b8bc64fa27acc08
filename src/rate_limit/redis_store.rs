use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::info;

use super::{RateDecision, RateStore};
use crate::error::{GatewayError, Result};

// Count, start the window on the first hit, and keep the stored count capped
// at the ceiling. Runs server-side, so one caller's hits never interleave.
const HIT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
if count > tonumber(ARGV[2]) then
  redis.call('DECR', KEYS[1])
end
return {count, ttl}
";

const KEY_PREFIX: &str = "bio:rate:";

/// Rate table kept in Redis. Records expire with their window, so no sweep is needed.
#[derive(Clone)]
pub struct RedisRateStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisRateStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| GatewayError::Config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::RateStore(e.to_string()))?;
        info!("rate table backed by redis");

        Ok(Self {
            conn,
            script: Script::new(HIT_SCRIPT),
        })
    }
}

fn decision_from(count: i64, ttl_ms: i64, ceiling: u32) -> RateDecision {
    let ceiling_i = i64::from(ceiling);
    let allowed = count <= ceiling_i;
    RateDecision {
        allowed,
        limit: ceiling,
        remaining: if allowed { (ceiling_i - count) as u32 } else { 0 },
        reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn hit(&self, key: &str, ceiling: u32, window: Duration) -> Result<RateDecision> {
        let mut conn = self.conn.clone();
        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(format!("{KEY_PREFIX}{key}"))
            .arg(window.as_millis() as u64)
            .arg(ceiling)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| GatewayError::RateStore(e.to_string()))?;

        Ok(decision_from(count, ttl_ms, ceiling))
    }

    async fn sweep(&self) -> usize {
        0
    }

    fn tracked(&self) -> Option<usize> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_counts_down_then_rejects() {
        let d = decision_from(1, 60_000, 3);
        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
        assert_eq!(d.reset_after, Duration::from_secs(60));

        let d = decision_from(4, 1_500, 3);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
    }
}
