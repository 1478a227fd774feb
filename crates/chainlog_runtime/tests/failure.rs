//! Fail-closed behavior when the store cannot persist.

use chainlog_log::{LogData, LogEntry};
use chainlog_runtime::{Engine, EngineConfig, EngineError, EngineState};
use chainlog_storage::{MemoryStore, PersistentStore, StoreError, StoreResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Memory store whose appends can be switched off
#[derive(Default)]
struct SwitchableStore {
    inner: MemoryStore,
    broken: AtomicBool,
    attempts: AtomicU32,
}

impl SwitchableStore {
    fn broken() -> Self {
        let store = Self::default();
        store.broken.store(true, Ordering::SeqCst);
        store
    }
}

impl PersistentStore for SwitchableStore {
    fn append_batch(&self, entries: &[LogEntry]) -> StoreResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                reason: "no space left on device".to_string(),
            });
        }
        self.inner.append_batch(entries)
    }

    fn read_range(&self, from: u64, limit: usize) -> StoreResult<Vec<LogEntry>> {
        self.inner.read_range(from, limit)
    }

    fn tip(&self) -> StoreResult<Option<LogEntry>> {
        self.inner.tip()
    }

    fn count(&self) -> StoreResult<u64> {
        self.inner.count()
    }
}

fn config(batch_size: usize) -> EngineConfig {
    EngineConfig::new("unused.redb")
        .with_batch_size(batch_size)
        .with_flush_interval(Duration::from_secs(3600))
        .with_max_retries(2)
        .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

#[tokio::test]
async fn test_exhausted_retries_fail_closed() {
    let store = Arc::new(SwitchableStore::broken());
    let engine = Engine::start(config(100), store.clone()).await.unwrap();

    engine.log("INFO", "AUTH", "login", LogData::new()).await.unwrap();
    let err = engine.flush().await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { attempts: 3, .. }));
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(engine.state(), EngineState::Failed);

    let err = engine.log("INFO", "AUTH", "after", LogData::new()).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Shutdown {
            state: EngineState::Failed
        }
    );

    let stats = engine.stats();
    assert_eq!(stats.flush_retries, 2);
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.pending(), 1);
}

#[tokio::test]
async fn test_shutdown_reports_persistence_failure() {
    let store = Arc::new(SwitchableStore::broken());
    let engine = Engine::start(config(100), store.clone()).await.unwrap();

    engine.log("INFO", "AUTH", "login", LogData::new()).await.unwrap();
    let err = engine.shutdown().await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence { .. }));
    assert_eq!(engine.state(), EngineState::Failed);
    assert_eq!(store.count().unwrap(), 0);

    // Subsequent calls do not pretend the engine closed cleanly.
    assert!(engine.shutdown().await.is_err());
}

#[tokio::test]
async fn test_size_triggered_failure_stops_intake() {
    let store = Arc::new(SwitchableStore::broken());
    let engine = Engine::start(config(2), store.clone()).await.unwrap();

    engine.log("INFO", "SYS", "a", LogData::new()).await.unwrap();
    engine.log("INFO", "SYS", "b", LogData::new()).await.unwrap();

    // Give the worker a chance to hit the size trigger and fail.
    let mut waited = Duration::ZERO;
    while engine.state() == EngineState::Running && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(matches!(
        engine.log("INFO", "SYS", "c", LogData::new()).await,
        Err(EngineError::Shutdown { .. })
    ));
    assert!(matches!(
        engine.flush().await,
        Err(EngineError::Shutdown { .. })
    ));
}

#[tokio::test]
async fn test_transient_failure_recovers() {
    let store = Arc::new(SwitchableStore::broken());
    let config = config(100)
        .with_max_retries(50)
        .with_retry_backoff(Duration::from_millis(5), Duration::from_millis(5));
    let engine = Engine::start(config, store.clone()).await.unwrap();
    engine.log("INFO", "SYS", "a", LogData::new()).await.unwrap();

    let flusher = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.flush().await })
    };
    while store.attempts.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    store.broken.store(false, Ordering::SeqCst);
    flusher.await.unwrap().unwrap();

    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(store.count().unwrap(), 1);
    assert!(engine.stats().flush_retries >= 1);
    engine.shutdown().await.unwrap();
    assert!(engine.verify().await.unwrap().ok);
}
