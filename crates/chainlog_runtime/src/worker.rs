//! The single writer.
//!
//! One task owns the chain head and the batch buffer. It pops commands in
//! FIFO order, so index assignment follows arrival at the worker, not the
//! order in which producers called `log()`.

use chainlog_core::Timestamp;
use chainlog_log::ChainState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::batch::BatchWriter;
use crate::error::{EngineError, EngineResult};
use crate::monitor::EngineStats;
use crate::queue::{Command, IngestQueue};
use crate::state::StateCell;

/// Chain-owning consumer of the ingestion queue
pub(crate) struct Worker {
    queue: Arc<IngestQueue>,
    chain: ChainState,
    writer: BatchWriter,
    flush_interval: Duration,
    state: Arc<StateCell>,
    stats: Arc<EngineStats>,
}

impl Worker {
    pub(crate) fn new(
        queue: Arc<IngestQueue>,
        chain: ChainState,
        writer: BatchWriter,
        flush_interval: Duration,
        state: Arc<StateCell>,
        stats: Arc<EngineStats>,
    ) -> Self {
        Self {
            queue,
            chain,
            writer,
            flush_interval,
            state,
            stats,
        }
    }

    /// Run until the queue is closed and drained, or a flush fails for good.
    pub(crate) async fn run(mut self) -> EngineResult<()> {
        tracing::info!(next_index = self.chain.next_index(), "worker started");

        // Armed when the first entry lands in an empty buffer.
        let mut deadline = Instant::now() + self.flush_interval;
        loop {
            let command = tokio::select! {
                biased;
                () = tokio::time::sleep_until(deadline), if !self.writer.is_empty() => {
                    tracing::trace!(buffered = self.writer.len(), "flush interval elapsed");
                    if let Err(err) = self.writer.flush().await {
                        return Err(self.fail(err));
                    }
                    continue;
                }
                command = self.queue.pop() => command,
            };

            match command {
                Some(Command::Record(record)) => {
                    let entry = self.chain.commit(record, Timestamp::now());
                    self.stats.record_committed();
                    if self.writer.is_empty() {
                        deadline = Instant::now() + self.flush_interval;
                    }
                    if self.writer.push(entry) {
                        if let Err(err) = self.writer.flush().await {
                            return Err(self.fail(err));
                        }
                    }
                }
                Some(Command::Flush(reply)) => match self.writer.flush().await {
                    Ok(_) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        let err = self.fail(err);
                        let _ = reply.send(Err(err.clone()));
                        return Err(err);
                    }
                },
                None => break,
            }
        }

        if let Err(err) = self.writer.flush().await {
            return Err(self.fail(err));
        }
        tracing::info!(
            next_index = self.chain.next_index(),
            tip = %self.chain.tip(),
            "worker stopped"
        );
        Ok(())
    }

    /// Enter the fatal state: stop admitting, answer pending flushes, drop
    /// what can no longer be chained durably.
    fn fail(&self, err: EngineError) -> EngineError {
        self.state.fail();
        let mut dropped = 0usize;
        for command in self.queue.close_and_drain() {
            match command {
                Command::Record(_) => dropped += 1,
                Command::Flush(reply) => {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
        tracing::error!(error = %err, dropped, "engine failed closed");
        err
    }
}
