//! Engine lifecycle.
//!
//! `Running -> Draining -> Closed`, or `Running|Draining -> Failed` when a
//! batch cannot be persisted. `Closed` and `Failed` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Accepting entries
    Running,
    /// Shutdown requested; flushing what was accepted
    Draining,
    /// Worker stopped, everything accepted is durable
    Closed,
    /// Persistence failed after retries; fail-closed
    Failed,
}

impl EngineState {
    /// Whether `log()` is accepted in this state
    #[must_use]
    pub const fn is_accepting(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Closed => 2,
            Self::Failed => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            2 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Failed => "failed",
        })
    }
}

/// Lock-free state shared between handles and the worker
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Start in `Running`
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU8::new(EngineState::Running.to_u8()))
    }

    /// Current state
    #[must_use]
    pub fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Running -> Draining`. Returns false if the engine had already left
    /// `Running`.
    pub fn begin_drain(&self) -> bool {
        self.transition(EngineState::Running, EngineState::Draining)
    }

    /// `Running|Draining -> Closed`
    pub fn close(&self) -> bool {
        self.transition(EngineState::Draining, EngineState::Closed)
            || self.transition(EngineState::Running, EngineState::Closed)
    }

    /// Any non-terminal state `-> Failed`
    pub fn fail(&self) -> bool {
        self.transition(EngineState::Running, EngineState::Failed)
            || self.transition(EngineState::Draining, EngineState::Failed)
    }

    fn transition(&self, from: EngineState, to: EngineState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), EngineState::Running);
        assert!(cell.get().is_accepting());

        assert!(cell.begin_drain());
        assert_eq!(cell.get(), EngineState::Draining);
        assert!(!cell.begin_drain());

        assert!(cell.close());
        assert_eq!(cell.get(), EngineState::Closed);
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_terminal_states_stick() {
        let cell = StateCell::new();
        assert!(cell.fail());
        assert!(!cell.close());
        assert!(!cell.begin_drain());
        assert_eq!(cell.get(), EngineState::Failed);

        let cell = StateCell::new();
        assert!(cell.close());
        assert!(!cell.fail());
        assert_eq!(cell.get(), EngineState::Closed);
    }

    #[test]
    fn test_fail_while_draining() {
        let cell = StateCell::new();
        cell.begin_drain();
        assert!(cell.fail());
        assert_eq!(cell.get(), EngineState::Failed);
    }
}
