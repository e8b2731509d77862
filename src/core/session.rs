//! Test session
//!
//! Tracks the result of each of the 112 fixture pins, which pin the
//! operator should test next, and the state of the run. All mutation goes
//! through `&mut self`; the orchestrator is the single owner.

use crate::core::state_machine::{TestState, TransitionLog};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Number of pins on the fixture
pub const TOTAL_PINS: usize = 112;

/// Outcome of one pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinResult {
    /// Not tested in this run
    #[default]
    Untested,
    /// Continuity confirmed
    Pass,
    /// No continuity
    Fail,
}

impl PinResult {
    /// Check if the pin has a result
    pub fn is_tested(&self) -> bool {
        !matches!(self, Self::Untested)
    }
}

impl fmt::Display for PinResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untested => write!(f, "Untested"),
            Self::Pass => write!(f, "Pass"),
            Self::Fail => write!(f, "Fail"),
        }
    }
}

/// One fixture pin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    index: usize,
    name: String,
    result: PinResult,
}

impl Pin {
    /// Untested pin; index `i` is displayed as `i + 1`
    pub fn new(index: usize) -> Self {
        Self {
            index,
            name: (index + 1).to_string(),
            result: PinResult::Untested,
        }
    }

    /// Zero-based index, as sent to the fixture
    pub fn index(&self) -> usize {
        self.index
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current result
    pub fn result(&self) -> PinResult {
        self.result
    }
}

/// Who drives the pin reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Operator triggers each read
    #[default]
    Manual,
    /// Fixture reports passing pins on its own
    Auto,
}

impl FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" | "m" => Ok(Self::Manual),
            "auto" | "a" => Ok(Self::Auto),
            other => Err(format!("unknown test mode: {}", other)),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Events for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The run changed state
    StateChanged(TestState),
    /// A pin got a result
    PinUpdated(Pin),
    /// Bring this pin index into view
    ScrollToPin(usize),
    /// Fixture found / not found
    DeviceStatus(bool),
}

/// Totals of a session, for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Test name
    pub name: String,
    /// Current state
    pub state: TestState,
    /// Current mode
    pub mode: TestMode,
    /// Pins that passed
    pub passed: usize,
    /// Pins that failed
    pub failed: usize,
    /// Pins not yet tested
    pub untested: usize,
}

/// Reads one pin for a manual test
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PinProbe: Send + Sync {
    /// `true` when `pin` has continuity
    async fn probe(&self, pin: usize) -> bool;
}

/// A continuity test run over all fixture pins
pub struct TestSession {
    name: String,
    state: TestState,
    mode: TestMode,
    pins: Vec<Pin>,
    selected: Option<usize>,
    probe: Arc<dyn PinProbe>,
    events: broadcast::Sender<SessionEvent>,
    transitions: TransitionLog,
}

impl TestSession {
    /// Create an empty session with its own event channel
    pub fn new(probe: Arc<dyn PinProbe>) -> Self {
        let (events, _) = broadcast::channel(512);
        Self::with_events(probe, events)
    }

    /// Create an empty session publishing on an existing channel
    pub fn with_events(probe: Arc<dyn PinProbe>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            name: String::new(),
            state: TestState::None,
            mode: TestMode::default(),
            pins: fresh_pins(),
            selected: None,
            probe,
            events,
            transitions: TransitionLog::default(),
        }
    }

    /// Subscribe to session events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Test name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set test name
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Current state
    pub fn state(&self) -> TestState {
        self.state
    }

    /// Current mode
    pub fn mode(&self) -> TestMode {
        self.mode
    }

    /// Set mode
    pub fn set_mode(&mut self, mode: TestMode) {
        self.mode = mode;
    }

    /// All pins in index order
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// Pin by index
    pub fn pin(&self, index: usize) -> Option<&Pin> {
        self.pins.get(index)
    }

    /// Index of the pin to test next
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    /// Number of pins with a result
    pub fn tested_count(&self) -> usize {
        self.pins.iter().filter(|p| p.result.is_tested()).count()
    }

    /// Number of pins with the given result
    pub fn count(&self, result: PinResult) -> usize {
        self.pins.iter().filter(|p| p.result == result).count()
    }

    /// Whether any pin has a result
    pub fn has_tested_any(&self) -> bool {
        self.pins.iter().any(|p| p.result.is_tested())
    }

    /// Current totals
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            name: self.name.clone(),
            state: self.state,
            mode: self.mode,
            passed: self.count(PinResult::Pass),
            failed: self.count(PinResult::Fail),
            untested: self.count(PinResult::Untested),
        }
    }

    /// Recorded state transitions
    pub fn transitions(&self) -> &TransitionLog {
        &self.transitions
    }

    /// Begin a run. Results of a previous run are discarded, not resumed.
    pub fn start_test(&mut self) {
        if self.has_tested_any() {
            self.pins = fresh_pins();
        }
        self.selected = Some(0);
        self.transition(TestState::Running);
    }

    /// End a run early. A run without progress counts as cancelled.
    pub fn stop_test(&mut self) {
        let next = if self.has_tested_any() {
            TestState::Aborted
        } else {
            TestState::None
        };
        self.transition(next);
    }

    /// Read `index` through the probe, record the result and move the
    /// selection on from it. Unknown indices are ignored.
    pub async fn test_pin_connection(&mut self, index: usize) -> Option<PinResult> {
        if index >= self.pins.len() {
            debug!("Ignoring test of unknown pin {}", index);
            return None;
        }

        let result = if self.probe.probe(index).await {
            PinResult::Pass
        } else {
            PinResult::Fail
        };
        self.set_result(index, result);

        self.selected = Some(index);
        self.select_next_pin();
        Some(result)
    }

    /// Record a pass reported by the fixture in auto mode
    pub fn register_pin_success(&mut self, index: usize) -> bool {
        if index >= self.pins.len() {
            debug!("Ignoring pass for unknown pin {}", index);
            return false;
        }

        self.set_result(index, PinResult::Pass);
        if self.selected == Some(index) {
            self.select_next_pin();
        } else {
            self.check_completion();
        }
        true
    }

    /// Move the selection to the next untested pin after the current one,
    /// wrapping around. The selection stays put when every pin is tested.
    pub fn select_next_pin(&mut self) {
        if let Some(current) = self.selected {
            let next = (current + 1..self.pins.len())
                .chain(0..=current)
                .find(|&i| !self.pins[i].result.is_tested());
            if let Some(next) = next {
                self.selected = Some(next);
            }
        }
        self.check_completion();
    }

    /// Reset to an empty, unnamed session
    pub fn clear_test(&mut self) {
        self.pins = fresh_pins();
        self.name.clear();
        self.selected = None;
        self.transition(TestState::None);
    }

    /// Reflect the outcome of fixture discovery: `None` when found,
    /// `ConnectionError` otherwise. A running test is left alone.
    pub fn set_connection_status(&mut self, found: bool) {
        match (found, self.state) {
            (_, TestState::Running) => {}
            (true, state) if state != TestState::None => self.transition(TestState::None),
            (false, state) if state != TestState::ConnectionError => {
                self.transition(TestState::ConnectionError)
            }
            _ => {}
        }
    }

    fn set_result(&mut self, index: usize, result: PinResult) {
        let pin = &mut self.pins[index];
        pin.result = result;
        let _ = self.events.send(SessionEvent::PinUpdated(pin.clone()));
    }

    fn check_completion(&mut self) {
        if self.state != TestState::Completed && self.tested_count() == TOTAL_PINS {
            info!(
                "All {} pins tested ({} passed, {} failed)",
                TOTAL_PINS,
                self.count(PinResult::Pass),
                self.count(PinResult::Fail)
            );
            self.transition(TestState::Completed);
        }
    }

    fn transition(&mut self, next: TestState) {
        debug!("Test state {} -> {}", self.state, next);
        self.transitions.record(self.state, next);
        self.state = next;
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }
}

fn fresh_pins() -> Vec<Pin> {
    (0..TOTAL_PINS).map(Pin::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn probe_returning(result: bool) -> Arc<dyn PinProbe> {
        let mut probe = MockPinProbe::new();
        probe.expect_probe().returning(move |_| result);
        Arc::new(probe)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn state_changes(events: &[SessionEvent]) -> Vec<TestState> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fresh_session() {
        let session = TestSession::new(probe_returning(true));

        assert_eq!(session.state(), TestState::None);
        assert_eq!(session.pins().len(), TOTAL_PINS);
        assert!(session.pins().iter().all(|p| p.result() == PinResult::Untested));
        assert_eq!(session.selected_index(), None);
        assert_eq!(session.pin(0).map(Pin::name), Some("1"));
        assert_eq!(session.pin(111).map(Pin::name), Some("112"));
        assert!(session.pin(112).is_none());
    }

    #[test]
    fn test_start_selects_first_pin() {
        let mut session = TestSession::new(probe_returning(true));
        let mut rx = session.subscribe();

        session.start_test();

        assert_eq!(session.state(), TestState::Running);
        assert_eq!(session.selected_index(), Some(0));
        assert_eq!(state_changes(&drain(&mut rx)), vec![TestState::Running]);
    }

    #[tokio::test]
    async fn test_restart_discards_previous_results() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();
        session.test_pin_connection(0).await;
        session.test_pin_connection(40).await;
        session.stop_test();

        session.start_test();

        assert_eq!(session.tested_count(), 0);
        assert_eq!(session.selected_index(), Some(0));
        assert_eq!(session.state(), TestState::Running);
    }

    #[tokio::test]
    async fn test_stop_with_progress_aborts() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();
        session.test_pin_connection(3).await;

        session.stop_test();
        assert_eq!(session.state(), TestState::Aborted);
    }

    #[test]
    fn test_stop_without_progress_cancels() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();

        session.stop_test();
        assert_eq!(session.state(), TestState::None);
    }

    #[tokio::test]
    async fn test_failed_pin_advances_to_next_untested() {
        let mut probe = MockPinProbe::new();
        probe.expect_probe().with(eq(5)).times(1).returning(|_| false);
        let mut session = TestSession::new(Arc::new(probe));
        session.start_test();
        session.register_pin_success(6);
        session.register_pin_success(7);

        let result = session.test_pin_connection(5).await;

        assert_eq!(result, Some(PinResult::Fail));
        assert_eq!(session.pin(5).map(Pin::result), Some(PinResult::Fail));
        assert_eq!(session.selected_index(), Some(8));
    }

    #[tokio::test]
    async fn test_unknown_pin_is_ignored() {
        let mut probe = MockPinProbe::new();
        probe.expect_probe().never();
        let mut session = TestSession::new(Arc::new(probe));
        session.start_test();

        assert_eq!(session.test_pin_connection(TOTAL_PINS).await, None);
        assert!(!session.register_pin_success(500));
        assert_eq!(session.selected_index(), Some(0));
    }

    #[tokio::test]
    async fn test_retest_keeps_forward_progress() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();
        for pin in 0..10 {
            session.test_pin_connection(pin).await;
        }
        assert_eq!(session.selected_index(), Some(10));

        // Re-testing an earlier pin jumps forward past tested pins
        session.test_pin_connection(2).await;
        assert_eq!(session.selected_index(), Some(10));
    }

    #[tokio::test]
    async fn test_selection_wraps_to_earlier_gap() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();
        for pin in 1..TOTAL_PINS - 1 {
            session.register_pin_success(pin);
        }

        session.test_pin_connection(TOTAL_PINS - 1).await;

        assert_eq!(session.selected_index(), Some(0));
        assert_eq!(session.state(), TestState::Running);
    }

    #[tokio::test]
    async fn test_completion_fires_once() {
        let mut session = TestSession::new(probe_returning(true));
        let mut rx = session.subscribe();
        session.start_test();

        for pin in 0..TOTAL_PINS {
            session.test_pin_connection(pin).await;
        }
        assert_eq!(session.state(), TestState::Completed);
        assert_eq!(session.selected_index(), Some(TOTAL_PINS - 1));

        session.test_pin_connection(50).await;
        session.register_pin_success(51);
        session.select_next_pin();

        let changes = state_changes(&drain(&mut rx));
        assert_eq!(changes, vec![TestState::Running, TestState::Completed]);
        assert_eq!(session.transitions().entries_into(TestState::Completed), 1);
    }

    #[test]
    fn test_auto_passes_in_order_complete_the_run() {
        let mut session = TestSession::new(probe_returning(false));
        session.set_mode(TestMode::Auto);
        session.start_test();

        for pin in 0..TOTAL_PINS {
            assert!(session.register_pin_success(pin));
        }

        assert_eq!(session.state(), TestState::Completed);
        assert!(session.pins().iter().all(|p| p.result() == PinResult::Pass));
    }

    #[test]
    fn test_register_moves_selection_only_from_selected_pin() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();

        session.register_pin_success(4);
        assert_eq!(session.selected_index(), Some(0));

        session.register_pin_success(0);
        assert_eq!(session.selected_index(), Some(1));
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let mut session = TestSession::new(probe_returning(true));
        session.set_name("Harness A");
        session.start_test();
        session.test_pin_connection(0).await;

        session.clear_test();

        assert_eq!(session.state(), TestState::None);
        assert_eq!(session.name(), "");
        assert_eq!(session.tested_count(), 0);
        assert_eq!(session.selected_index(), None);
    }

    #[tokio::test]
    async fn test_pin_updates_are_published() {
        let mut session = TestSession::new(probe_returning(false));
        let mut rx = session.subscribe();
        session.start_test();

        session.test_pin_connection(9).await;

        let events = drain(&mut rx);
        let mut expected = Pin::new(9);
        expected.result = PinResult::Fail;
        assert!(events.contains(&SessionEvent::PinUpdated(expected)));
    }

    #[test]
    fn test_connection_status() {
        let mut session = TestSession::new(probe_returning(true));

        session.set_connection_status(false);
        assert_eq!(session.state(), TestState::ConnectionError);
        assert_eq!(session.state().banner(), "No device found");

        session.set_connection_status(true);
        assert_eq!(session.state(), TestState::None);

        session.start_test();
        session.set_connection_status(false);
        assert_eq!(session.state(), TestState::Running);
    }

    #[tokio::test]
    async fn test_found_device_resets_finished_run_to_ready() {
        let mut session = TestSession::new(probe_returning(true));
        session.start_test();
        session.test_pin_connection(0).await;
        session.stop_test();
        assert_eq!(session.state(), TestState::Aborted);

        session.set_connection_status(true);

        assert_eq!(session.state(), TestState::None);
        assert_eq!(session.state().banner(), "Ready");
        assert_eq!(session.pin(0).map(Pin::result), Some(PinResult::Pass));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("AUTO".parse::<TestMode>(), Ok(TestMode::Auto));
        assert_eq!("manual".parse::<TestMode>(), Ok(TestMode::Manual));
        assert!("semi".parse::<TestMode>().is_err());
    }
}
