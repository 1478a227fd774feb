//! Logging engine.
//!
//! An [`Engine`] is an explicit instance: producers hold clones of it and call
//! [`Engine::log`]; one worker task behind the queue chains and persists what
//! they send. There is no process-wide accessor.

use chainlog_log::{LogData, Provisional, VerificationReport};
use chainlog_storage::{AuditVerifier, PersistentStore, RedbStore, Scan, StoreError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::batch::BatchWriter;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::heartbeat;
use crate::monitor::{EngineStats, StatsSnapshot};
use crate::queue::{Admission, Command, IngestQueue, PushError};
use crate::state::{EngineState, StateCell};
use crate::worker::Worker;

struct Shared {
    config: EngineConfig,
    store: Arc<dyn PersistentStore>,
    queue: Arc<IngestQueue>,
    state: Arc<StateCell>,
    stats: Arc<EngineStats>,
    worker: tokio::sync::Mutex<Option<JoinHandle<EngineResult<()>>>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone without shutdown: let the worker drain and flush.
        if self.state.begin_drain() {
            tracing::warn!("engine dropped without shutdown, draining in background");
        }
        self.queue.close();
    }
}

/// Tamper-evident logging engine
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

/// Non-owning handle; does not keep the engine alive
#[derive(Clone)]
pub struct WeakEngine {
    shared: Weak<Shared>,
}

impl WeakEngine {
    /// The engine, if any strong handle is still alive
    #[must_use]
    pub fn upgrade(&self) -> Option<Engine> {
        self.shared.upgrade().map(|shared| Engine { shared })
    }
}

impl Engine {
    /// Open the redb database named by `config.db_name` and start.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the config is invalid or the store cannot be opened
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let path = config.db_name.clone();
        let store = tokio::task::spawn_blocking(move || RedbStore::open(path))
            .await
            .map_err(StoreError::backend)??;
        Self::start(config, Arc::new(store)).await
    }

    /// Start on an existing store, continuing its chain.
    ///
    /// The worker resumes from the store's highest entry; a tip that fails
    /// to decode prevents start. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the config is invalid or the tip cannot be read
    pub async fn start(config: EngineConfig, store: Arc<dyn PersistentStore>) -> EngineResult<Self> {
        config.validate()?;

        let tip = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || store.tip())
                .await
                .map_err(StoreError::backend)??
        };
        let chain = chainlog_log::ChainState::resume(tip.as_ref());

        let queue = Arc::new(IngestQueue::new(
            config.queue_capacity,
            config.backpressure_policy,
        ));
        let state = Arc::new(StateCell::new());
        let stats = Arc::new(EngineStats::new());
        let writer = BatchWriter::new(
            Arc::clone(&store),
            config.batch_size,
            config.retry_policy(),
            Arc::clone(&stats),
        );
        let worker = Worker::new(
            Arc::clone(&queue),
            chain,
            writer,
            config.flush_interval(),
            Arc::clone(&state),
            Arc::clone(&stats),
        );

        tracing::info!(
            db = %config.db_name.display(),
            resume_at = tip.as_ref().map_or(0, |t| t.index + 1),
            batch_size = config.batch_size,
            policy = %config.backpressure_policy,
            "starting engine"
        );

        let engine = Self {
            shared: Arc::new(Shared {
                config,
                store,
                queue,
                state,
                stats,
                worker: tokio::sync::Mutex::new(Some(tokio::spawn(worker.run()))),
                heartbeat: Mutex::new(None),
            }),
        };

        if let Some(period) = engine.shared.config.heartbeat_interval() {
            let handle = heartbeat::spawn(engine.downgrade(), period);
            *engine
                .shared
                .heartbeat
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        Ok(engine)
    }

    /// Weak handle for background producers
    #[must_use]
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Submit a record. Returns once it is queued, not once it is durable.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Validation`] for malformed input; nothing is queued
    /// - [`EngineError::Backpressure`] when full under `reject`
    /// - [`EngineError::Shutdown`] once shutdown began or the engine failed
    pub async fn log(
        &self,
        level: &str,
        category: &str,
        message: impl Into<String>,
        data: LogData,
    ) -> EngineResult<()> {
        let record = Provisional::new(level, category, message, data)?;
        self.submit(record).await
    }

    /// Submit an already validated record
    ///
    /// # Errors
    ///
    /// Same as [`log`](Self::log), minus validation
    pub async fn submit(&self, record: Provisional) -> EngineResult<()> {
        let shared = &self.shared;
        let state = shared.state.get();
        if !state.is_accepting() {
            return Err(EngineError::Shutdown { state });
        }

        match shared.queue.push(record).await {
            Ok(admission) => {
                shared.stats.record_accepted();
                if admission == Admission::Evicted {
                    shared.stats.record_evicted();
                    tracing::debug!("queue full, evicted oldest record");
                }
                Ok(())
            }
            Err(PushError::Full) => {
                shared.stats.record_rejected();
                Err(EngineError::Backpressure {
                    capacity: shared.queue.capacity(),
                })
            }
            Err(PushError::Closed) => Err(EngineError::Shutdown {
                state: shared.state.get(),
            }),
        }
    }

    /// Make every record queued before this call durable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if the flush failed for good, or
    /// [`EngineError::Shutdown`] if the engine is no longer running
    pub async fn flush(&self) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        if self.shared.queue.push_control(Command::Flush(tx)).is_err() {
            return Err(EngineError::Shutdown {
                state: self.shared.state.get(),
            });
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Shutdown {
                state: self.shared.state.get(),
            }),
        }
    }

    /// Stop accepting, drain the queue, flush, and wait for the worker.
    ///
    /// Idempotent: later calls return once the first has finished.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if the final flush (or an earlier
    /// one) failed after retries
    pub async fn shutdown(&self) -> EngineResult<()> {
        let shared = &self.shared;
        let mut worker = shared.worker.lock().await;
        let Some(handle) = worker.take() else {
            return match shared.state.get() {
                EngineState::Failed => Err(EngineError::Shutdown {
                    state: EngineState::Failed,
                }),
                _ => Ok(()),
            };
        };

        if shared.state.begin_drain() {
            tracing::info!("shutdown requested, draining");
        }
        if let Some(heartbeat) = shared
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            heartbeat.abort();
        }
        shared.queue.close();

        let result = match handle.await {
            Ok(result) => result,
            Err(err) => Err(EngineError::Store(StoreError::backend(err))),
        };
        match &result {
            Ok(()) => {
                shared.state.close();
                tracing::info!("engine closed");
            }
            Err(err) => {
                shared.state.fail();
                tracing::error!(error = %err, "engine shut down with failure");
            }
        }
        result
    }

    /// Audit the whole persisted chain.
    ///
    /// Reads the store as committed so far; entries still buffered are not
    /// covered. Call [`flush`](Self::flush) first for an up-to-date audit.
    ///
    /// # Errors
    ///
    /// Returns error only if the store cannot be read
    pub async fn verify(&self) -> EngineResult<VerificationReport> {
        let auditor = AuditVerifier::new(Arc::clone(&self.shared.store));
        Ok(tokio::task::spawn_blocking(move || auditor.verify())
            .await
            .map_err(StoreError::backend)??)
    }

    /// Audit the last `n` persisted entries
    ///
    /// # Errors
    ///
    /// Returns error only if the store cannot be read
    pub async fn verify_tail(&self, n: u64) -> EngineResult<VerificationReport> {
        let auditor = AuditVerifier::new(Arc::clone(&self.shared.store));
        Ok(tokio::task::spawn_blocking(move || auditor.verify_tail(n))
            .await
            .map_err(StoreError::backend)??)
    }

    /// Lazy ordered scan of persisted entries from `from`.
    ///
    /// The iterator performs blocking reads; drive it from a blocking
    /// context when on an async runtime.
    #[must_use]
    pub fn scan(&self, from: u64) -> Scan {
        Scan::new(Arc::clone(&self.shared.store), from)
    }

    /// Number of persisted entries
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub async fn count(&self) -> EngineResult<u64> {
        let store = Arc::clone(&self.shared.store);
        Ok(tokio::task::spawn_blocking(move || store.count())
            .await
            .map_err(StoreError::backend)??)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.state.get()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Records waiting in the queue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> Arc<dyn PersistentStore> {
        Arc::clone(&self.shared.store)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("db_name", &self.shared.config.db_name)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::BackpressurePolicy;
    use chainlog_storage::MemoryStore;
    use std::time::Duration;

    fn config() -> EngineConfig {
        EngineConfig::new("unused.redb")
            .with_batch_size(4)
            .with_flush_interval(Duration::from_secs(3600))
    }

    async fn memory_engine(config: EngineConfig) -> (Engine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::start(config, store.clone()).await.unwrap();
        (engine, store)
    }

    #[tokio::test]
    async fn test_engine_start_and_shutdown() {
        let (engine, store) = memory_engine(config()).await;
        assert_eq!(engine.state(), EngineState::Running);

        engine.log("INFO", "AUTH", "login", LogData::new()).await.unwrap();
        engine.shutdown().await.unwrap();

        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(store.count().unwrap(), 1);
        assert!(engine.verify().await.unwrap().ok);
    }

    #[tokio::test]
    async fn test_log_validation_has_no_side_effect() {
        let (engine, _store) = memory_engine(config()).await;
        let err = engine.log("", "AUTH", "x", LogData::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(engine.stats().accepted, 0);
        assert_eq!(engine.queued(), 0);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_after_shutdown_is_rejected() {
        let (engine, _store) = memory_engine(config()).await;
        engine.shutdown().await.unwrap();
        let err = engine.log("INFO", "AUTH", "late", LogData::new()).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::Shutdown {
                state: EngineState::Closed
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (engine, _store) = memory_engine(config()).await;
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
        assert_eq!(engine.state(), EngineState::Closed);
    }

    #[tokio::test]
    async fn test_flush_now() {
        let (engine, store) = memory_engine(config()).await;
        engine.log("INFO", "SYS", "one", LogData::new()).await.unwrap();
        engine.log("INFO", "SYS", "two", LogData::new()).await.unwrap();
        assert_eq!(store.count().unwrap(), 0);

        engine.flush().await.unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(engine.count().await.unwrap(), 2);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_after_shutdown() {
        let (engine, _store) = memory_engine(config()).await;
        engine.shutdown().await.unwrap();
        assert!(matches!(
            engine.flush().await,
            Err(EngineError::Shutdown { .. })
        ));
    }

    #[tokio::test]
    async fn test_interval_flush() {
        let config = config().with_flush_interval(Duration::from_millis(20));
        let (engine, store) = memory_engine(config).await;
        engine.log("INFO", "SYS", "tick", LogData::new()).await.unwrap();

        let mut waited = Duration::ZERO;
        while store.count().unwrap() == 0 && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }
        assert_eq!(store.count().unwrap(), 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reject_policy_reports_backpressure() {
        let config = config()
            .with_queue_capacity(1)
            .with_backpressure_policy(BackpressurePolicy::Reject);
        let (engine, _store) = memory_engine(config).await;

        // The single-threaded test runtime does not run the worker between
        // admissions, so the queue stays saturated after the first record.
        let mut rejected = 0;
        for i in 0..100 {
            match engine.log("INFO", "LOAD", format!("m{i}"), LogData::new()).await {
                Ok(()) => {}
                Err(EngineError::Backpressure { capacity }) => {
                    assert_eq!(capacity, 1);
                    rejected += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        let stats = engine.stats();
        assert!(rejected > 0);
        assert_eq!(stats.rejected, rejected);
        assert_eq!(stats.accepted + stats.rejected, 100);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_and_verify_tail() {
        let (engine, _store) = memory_engine(config()).await;
        for i in 0..10i64 {
            engine
                .log("INFO", "SYS", format!("m{i}"), LogData::new().with("i", i))
                .await
                .unwrap();
        }
        engine.shutdown().await.unwrap();

        let indices: Vec<u64> = engine.scan(7).map(|e| e.unwrap().index).collect();
        assert_eq!(indices, vec![7, 8, 9]);
        let report = engine.verify_tail(3).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.checked, 3);
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let err = Engine::open(EngineConfig::default().with_batch_size(0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }
}
