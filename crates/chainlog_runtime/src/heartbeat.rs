//! Heartbeat producer.
//!
//! A plain producer: every period it logs `INFO/HEARTBEAT "alive"` through the
//! same `log()` path as any caller. Gaps between heartbeats in the chain show
//! when the host was down.

use chainlog_log::LogData;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::engine::WeakEngine;
use crate::error::EngineError;

/// Level of heartbeat entries
pub const HEARTBEAT_LEVEL: &str = "INFO";
/// Category of heartbeat entries
pub const HEARTBEAT_CATEGORY: &str = "HEARTBEAT";
/// Message of heartbeat entries
pub const HEARTBEAT_MESSAGE: &str = "alive";

/// Spawn the heartbeat task. It ends once the engine is gone or stops
/// accepting entries.
pub fn spawn(engine: WeakEngine, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats = 0u64;

        loop {
            ticker.tick().await;
            let Some(engine) = engine.upgrade() else {
                break;
            };
            match engine
                .log(HEARTBEAT_LEVEL, HEARTBEAT_CATEGORY, HEARTBEAT_MESSAGE, LogData::new())
                .await
            {
                Ok(()) => beats += 1,
                Err(EngineError::Backpressure { .. }) => {
                    tracing::warn!("heartbeat skipped, queue full");
                }
                Err(err) => {
                    tracing::debug!(error = %err, "heartbeat stopping");
                    break;
                }
            }
        }
        tracing::debug!(beats, "heartbeat stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use chainlog_storage::{MemoryStore, PersistentStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_heartbeat_logs_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let config = EngineConfig::new("unused.redb")
            .with_batch_size(1)
            .with_heartbeat(Duration::from_millis(10));
        let engine = Engine::start(config, store.clone()).await.unwrap();

        let mut waited = Duration::ZERO;
        while store.count().unwrap() < 3 && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        engine.shutdown().await.unwrap();

        let entries = store.read_range(0, 100).unwrap();
        assert!(entries.len() >= 3);
        assert!(entries.iter().all(|e| {
            e.level == HEARTBEAT_LEVEL
                && e.category == HEARTBEAT_CATEGORY
                && e.message == HEARTBEAT_MESSAGE
                && e.data.is_empty()
        }));
        assert!(engine.verify().await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_heartbeat_ends_when_engine_dropped() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::start(EngineConfig::new("unused.redb"), store)
            .await
            .unwrap();
        let handle = spawn(engine.downgrade(), Duration::from_millis(5));
        drop(engine);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
