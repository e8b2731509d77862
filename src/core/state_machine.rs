//! Test State Machine
//!
//! States of a continuity test run and a bounded record of how the run
//! moved between them.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Test state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TestState {
    /// Nothing running, ready to start
    #[default]
    None,
    /// Pins are being tested
    Running,
    /// Stopped by the operator after some progress
    Aborted,
    /// All pins tested
    Completed,
    /// No fixture was found
    ConnectionError,
}

impl TestState {
    /// Check if a test is in progress
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if state is terminal.
    ///
    /// Terminal states end a run but a new start is always allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Completed | Self::ConnectionError)
    }

    /// Banner text shown to the operator
    pub fn banner(&self) -> &'static str {
        match self {
            Self::None => "Ready",
            Self::Running => "Testing in progress",
            Self::Aborted => "Test Aborted",
            Self::Completed => "Test Completed",
            Self::ConnectionError => "No device found",
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Running => write!(f, "Running"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Completed => write!(f, "Completed"),
            Self::ConnectionError => write!(f, "ConnectionError"),
        }
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: TestState,
    /// New state
    pub to: TestState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
}

/// Bounded transition history
#[derive(Debug, Clone)]
pub struct TransitionLog {
    history: Vec<StateTransition>,
    max_history: usize,
}

impl Default for TransitionLog {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TransitionLog {
    /// Keep at most `max_history` transitions
    pub fn new(max_history: usize) -> Self {
        Self {
            history: Vec::new(),
            max_history: max_history.max(1),
        }
    }

    /// Record a transition
    pub fn record(&mut self, from: TestState, to: TestState) {
        self.history.push(StateTransition {
            from,
            to,
            timestamp: Local::now(),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }
    }

    /// Recorded transitions, oldest first
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// How many times `state` was entered
    pub fn entries_into(&self, state: TestState) -> usize {
        self.history.iter().filter(|t| t.to == state).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TestState::None.is_terminal());
        assert!(!TestState::Running.is_terminal());
        assert!(TestState::Aborted.is_terminal());
        assert!(TestState::Completed.is_terminal());
        assert!(TestState::ConnectionError.is_terminal());
    }

    #[test]
    fn test_banner_text() {
        assert_eq!(TestState::None.banner(), "Ready");
        assert_eq!(TestState::ConnectionError.banner(), "No device found");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut log = TransitionLog::new(3);
        for _ in 0..5 {
            log.record(TestState::None, TestState::Running);
        }
        log.record(TestState::Running, TestState::Completed);

        assert_eq!(log.history().len(), 3);
        assert_eq!(log.entries_into(TestState::Completed), 1);
        assert_eq!(log.history().last().map(|t| t.to), Some(TestState::Completed));
    }
}
