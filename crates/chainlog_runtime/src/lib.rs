//! chainlog Runtime
//!
//! Single-writer ingestion engine. Producers enqueue validated records; one
//! worker task assigns indices, chains digests, and persists in atomic
//! batches. Handles backpressure, retries, and fail-closed shutdown.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backpressure;
pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod monitor;
pub mod queue;
pub mod state;
mod worker;

pub use backpressure::{BackpressurePolicy, ParsePolicyError};
pub use batch::{BatchWriter, RetryPolicy};
pub use config::EngineConfig;
pub use engine::{Engine, WeakEngine};
pub use error::{EngineError, EngineResult};
pub use monitor::{EngineStats, StatsSnapshot};
pub use queue::{Admission, Command, IngestQueue, PushError};
pub use state::{EngineState, StateCell};
