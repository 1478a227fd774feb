//! Bounded ingestion queue.
//!
//! The only synchronization point between producers and the worker. Records
//! count against the capacity; control messages (flush requests) do not and
//! are never evicted, so a flush always reaches the worker behind every record
//! admitted before it.

use chainlog_log::Provisional;
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};

use crate::backpressure::BackpressurePolicy;
use crate::error::EngineResult;

/// Message from a producer to the worker
#[derive(Debug)]
pub enum Command {
    /// A validated record awaiting index, timestamp and digest
    Record(Provisional),
    /// Persist everything buffered so far, then reply
    Flush(oneshot::Sender<EngineResult<()>>),
}

impl Command {
    const fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }
}

/// How a record was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued without side effects
    Queued,
    /// Queued after evicting the oldest queued record
    Evicted,
}

/// Why a push failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Queue at capacity under `reject`
    #[error("queue full")]
    Full,
    /// Queue closed; the engine is stopping or failed
    #[error("queue closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    commands: VecDeque<Command>,
    records: usize,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO with a backpressure policy
#[derive(Debug)]
pub struct IngestQueue {
    inner: Mutex<Inner>,
    items: Notify,
    space: Notify,
    capacity: usize,
    policy: BackpressurePolicy,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` records (minimum 1)
    #[must_use]
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            items: Notify::new(),
            space: Notify::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Policy applied when full
    #[must_use]
    pub const fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Records currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records
    }

    /// Whether no records are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Admit a record according to the policy.
    ///
    /// Under `block` this waits for space; the wait ends early if the queue
    /// is closed.
    ///
    /// # Errors
    ///
    /// [`PushError::Full`] under `reject` when at capacity,
    /// [`PushError::Closed`] once the queue is closed
    pub async fn push(&self, record: Provisional) -> Result<Admission, PushError> {
        loop {
            let mut space = pin!(self.space.notified());
            space.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(PushError::Closed);
                }

                let mut admission = Admission::Queued;
                if inner.records >= self.capacity {
                    match self.policy {
                        BackpressurePolicy::Reject => return Err(PushError::Full),
                        BackpressurePolicy::Block => {}
                        BackpressurePolicy::DropOldest => {
                            if let Some(pos) = inner.commands.iter().position(Command::is_record) {
                                inner.commands.remove(pos);
                                inner.records -= 1;
                                admission = Admission::Evicted;
                            }
                        }
                    }
                }

                if inner.records < self.capacity {
                    inner.commands.push_back(Command::Record(record));
                    inner.records += 1;
                    drop(inner);
                    self.items.notify_one();
                    return Ok(admission);
                }
            }

            space.await;
        }
    }

    /// Enqueue a control message, ignoring capacity
    ///
    /// # Errors
    ///
    /// Returns the command back if the queue is closed
    pub fn push_control(&self, command: Command) -> Result<(), Command> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(command);
        }
        if command.is_record() {
            inner.records += 1;
        }
        inner.commands.push_back(command);
        drop(inner);
        self.items.notify_one();
        Ok(())
    }

    /// Next command in FIFO order; `None` once closed and empty
    pub async fn pop(&self) -> Option<Command> {
        loop {
            let mut items = pin!(self.items.notified());
            items.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(command) = inner.commands.pop_front() {
                    if command.is_record() {
                        inner.records -= 1;
                        drop(inner);
                        self.space.notify_one();
                    }
                    return Some(command);
                }
                if inner.closed {
                    return None;
                }
            }

            items.await;
        }
    }

    /// Stop admitting; queued commands stay poppable
    pub fn close(&self) {
        self.lock().closed = true;
        self.items.notify_one();
        self.space.notify_waiters();
    }

    /// Close and take everything still queued
    pub fn close_and_drain(&self) -> Vec<Command> {
        let drained = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.records = 0;
            inner.commands.drain(..).collect()
        };
        self.items.notify_one();
        self.space.notify_waiters();
        drained
    }
}
