//! Test Orchestration
//!
//! Binds a [`DeviceDriver`] to a [`TestSession`]:
//! - user actions (start, stop, pin tests, clear, export) are single-flight;
//!   an action issued while another one is in progress is rejected
//! - fixture notifications are queued and applied here, never from the
//!   serial listener
//! - every action is written to the event log

use crate::core::device::{DeviceDriver, DeviceEvent};
use crate::core::export::export_pins;
use crate::core::logger::EventLog;
use crate::core::session::{
    Pin, PinProbe, PinResult, SessionEvent, SessionSummary, TestMode, TestSession,
};
use crate::core::state_machine::TestState;
use async_trait::async_trait;
use std::error::Error;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a user action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action ran
    Performed,
    /// Another action was in progress; nothing happened
    Rejected,
    /// The action did not apply (not confirmed, no test running, unknown pin)
    Declined,
}

/// Holds the busy flag for the duration of one action
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pin probe reading through the fixture driver
pub struct DriverProbe(Arc<dyn DeviceDriver>);

impl DriverProbe {
    /// Wrap a driver
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self(driver)
    }
}

#[async_trait]
impl PinProbe for DriverProbe {
    async fn probe(&self, pin: usize) -> bool {
        self.0.test_pin(pin).await
    }
}

/// Connect112 test orchestrator
pub struct Orchestrator {
    driver: Arc<dyn DeviceDriver>,
    probe: Arc<dyn PinProbe>,
    session: Mutex<TestSession>,
    events: broadcast::Sender<SessionEvent>,
    notifications: Mutex<broadcast::Receiver<DeviceEvent>>,
    busy: AtomicBool,
    log: Option<Arc<EventLog>>,
}

impl Orchestrator {
    /// Create an orchestrator with an empty session
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        let probe: Arc<dyn PinProbe> = Arc::new(DriverProbe::new(driver.clone()));
        let (events, _) = broadcast::channel(512);
        let notifications = driver.subscribe();

        Self {
            session: Mutex::new(TestSession::with_events(probe.clone(), events.clone())),
            driver,
            probe,
            events,
            notifications: Mutex::new(notifications),
            busy: AtomicBool::new(false),
            log: None,
        }
    }

    /// Write actions to an event log
    pub fn with_log(mut self, log: Arc<EventLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Subscribe to session events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether a user action is in progress
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Current test state
    pub async fn state(&self) -> TestState {
        self.session.lock().await.state()
    }

    /// Status text for the current state
    pub async fn banner(&self) -> &'static str {
        self.state().await.banner()
    }

    /// Current test mode
    pub async fn mode(&self) -> TestMode {
        self.session.lock().await.mode()
    }

    /// Test name
    pub async fn name(&self) -> String {
        self.session.lock().await.name().to_string()
    }

    /// Set test name
    pub async fn set_name(&self, name: &str) {
        self.session.lock().await.set_name(name);
    }

    /// Snapshot of all pins
    pub async fn pins(&self) -> Vec<Pin> {
        self.session.lock().await.pins().to_vec()
    }

    /// Index of the pin to test next
    pub async fn selected_index(&self) -> Option<usize> {
        self.session.lock().await.selected_index()
    }

    /// Current totals
    pub async fn summary(&self) -> SessionSummary {
        self.session.lock().await.summary()
    }

    /// Discover the fixture again and reflect the outcome in the session
    pub async fn connect(&self) -> bool {
        self.log_message("Searching for fixture");
        let found = self.driver.initialize().await;

        self.session.lock().await.set_connection_status(found);
        let _ = self.events.send(SessionEvent::DeviceStatus(found));

        if found {
            let device = self.driver.describe();
            info!("Fixture ready: {}", device);
            self.log_message(&format!("Fixture found on {}", device));
        } else {
            warn!("No fixture found");
            self.log_message("No device found");
        }
        found
    }

    /// Start a test run and put the fixture in the session's mode
    pub async fn start_test(&self) -> ActionOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Start rejected: action in progress");
            return ActionOutcome::Rejected;
        };

        let mode = {
            let mut session = self.session.lock().await;
            self.discard_stale_passes(&mut session);
            session.start_test();
            session.mode()
        };
        self.log_message(&format!("Test started ({} mode)", mode));

        if !self.driver.open().await {
            warn!("Fixture could not be opened");
            self.log_message("Fixture could not be opened");
        }
        self.send_mode(mode).await;
        ActionOutcome::Performed
    }

    /// Stop the running test once `confirm` agrees
    pub async fn stop_test(&self, confirm: impl FnOnce() -> bool) -> ActionOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Stop rejected: action in progress");
            return ActionOutcome::Rejected;
        };

        if !self.state().await.is_running() {
            return ActionOutcome::Declined;
        }
        if !confirm() {
            debug!("Stop not confirmed");
            return ActionOutcome::Declined;
        }

        let state = {
            let mut session = self.session.lock().await;
            session.stop_test();
            session.state()
        };

        if !self.driver.auto_test_off().await {
            warn!("Fixture did not acknowledge AUTO_OFF");
        }
        self.driver.close().await;

        self.log_message(&format!("Test stopped ({})", state));
        ActionOutcome::Performed
    }

    /// Read one pin while a test is running
    pub async fn test_pin(&self, index: usize) -> ActionOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Pin test rejected: action in progress");
            return ActionOutcome::Rejected;
        };

        let mut session = self.session.lock().await;
        self.test_pin_in(&mut session, index).await
    }

    /// Read the currently selected pin
    pub async fn test_selected_pin(&self) -> ActionOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Pin test rejected: action in progress");
            return ActionOutcome::Rejected;
        };

        let mut session = self.session.lock().await;
        match session.selected_index() {
            Some(index) => self.test_pin_in(&mut session, index).await,
            None => ActionOutcome::Declined,
        }
    }

    async fn test_pin_in(&self, session: &mut TestSession, index: usize) -> ActionOutcome {
        if !session.state().is_running() {
            debug!("Pin test ignored: no test running");
            return ActionOutcome::Declined;
        }

        let Some(result) = session.test_pin_connection(index).await else {
            return ActionOutcome::Declined;
        };

        let name = session.pin(index).map(|p| p.name().to_string()).unwrap_or_default();
        self.log_message(&format!("Pin {} tested: {}", name, result));
        if result == PinResult::Fail {
            debug!("Pin {} has no continuity", name);
        }

        if let Some(next) = session.selected_index() {
            let _ = self.events.send(SessionEvent::ScrollToPin(next));
        }
        ActionOutcome::Performed
    }

    /// Reset the fixture and replace the session with a fresh one
    pub async fn clear_test(&self) -> ActionOutcome {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Clear rejected: action in progress");
            return ActionOutcome::Rejected;
        };

        if !self.driver.reset().await {
            warn!("Fixture did not acknowledge RESET");
            self.log_message("Fixture reset failed");
        }

        let mut session = self.session.lock().await;
        let mode = session.mode();
        *session = TestSession::with_events(self.probe.clone(), self.events.clone());
        session.set_mode(mode);
        session.clear_test();

        self.log_message("Test cleared");
        ActionOutcome::Performed
    }

    /// Change the mode. Outside a run the fixture is switched immediately;
    /// during a run the mode applies to the next start.
    pub async fn set_mode(&self, mode: TestMode) {
        let running = {
            let mut session = self.session.lock().await;
            session.set_mode(mode);
            session.state().is_running()
        };

        self.log_message(&format!("Mode set to {}", mode));
        if !running {
            self.send_mode(mode).await;
        }
    }

    /// Write the current pin results as CSV
    pub async fn export(&self, path: &Path) -> io::Result<ActionOutcome> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Export rejected: action in progress");
            return Ok(ActionOutcome::Rejected);
        };

        let pins = self.pins().await;
        if let Err(e) = export_pins(path, &pins) {
            self.log_error(&e);
            return Err(e);
        }

        info!("Results exported to {}", path.display());
        self.log_message(&format!("Results exported to {}", path.display()));
        Ok(ActionOutcome::Performed)
    }

    /// Leave the fixture in manual mode and close it
    pub async fn shutdown(&self) {
        if self.driver.is_device_found() {
            self.driver.auto_test_off().await;
            self.driver.close().await;
        }
        self.log_message("Session closed");
    }

    /// Apply every queued fixture notification. Returns how many were applied.
    pub async fn process_notifications(&self) -> usize {
        let mut applied = 0;
        loop {
            let event = {
                let mut notifications = self.notifications.lock().await;
                match notifications.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Lagged(missed)) => {
                        warn!("Dropped {} fixture notifications", missed);
                        continue;
                    }
                    Err(_) => break,
                }
            };
            self.apply_device_event(event).await;
            applied += 1;
        }
        applied
    }

    /// Wait for the next fixture notification and apply it.
    /// Returns `None` once the driver is gone.
    pub async fn next_notification(&self) -> Option<DeviceEvent> {
        let event = {
            let mut notifications = self.notifications.lock().await;
            loop {
                match notifications.recv().await {
                    Ok(event) => break event,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Dropped {} fixture notifications", missed);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        self.apply_device_event(event.clone()).await;
        Some(event)
    }

    /// Apply notifications until the run leaves `Running` or `cancel` fires
    pub async fn wait_for_run(&self, cancel: &CancellationToken) -> TestState {
        loop {
            let state = self.state().await;
            if !state.is_running() {
                return state;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return state,
                event = self.next_notification() => {
                    if event.is_none() {
                        return self.state().await;
                    }
                }
            }
        }
    }

    async fn apply_device_event(&self, event: DeviceEvent) {
        let mut session = self.session.lock().await;
        match event {
            DeviceEvent::PinPassed(index) => {
                if !session.state().is_running() {
                    debug!("Ignoring pass for pin {}: no test running", index);
                    return;
                }
                if session.register_pin_success(index) {
                    let _ = self.events.send(SessionEvent::ScrollToPin(index));
                }
            }
            DeviceEvent::DeviceStatus(found) => session.set_connection_status(found),
        }
    }

    /// Passes left over from an earlier auto run must not count for a new one
    fn discard_stale_passes(&self, session: &mut TestSession) {
        let Ok(mut notifications) = self.notifications.try_lock() else {
            return;
        };
        loop {
            match notifications.try_recv() {
                Ok(DeviceEvent::DeviceStatus(found)) => session.set_connection_status(found),
                Ok(DeviceEvent::PinPassed(index)) => debug!("Discarding stale pass for pin {}", index),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    async fn send_mode(&self, mode: TestMode) -> bool {
        let acknowledged = match mode {
            TestMode::Auto => self.driver.auto_test_on().await,
            TestMode::Manual => self.driver.auto_test_off().await,
        };
        if !acknowledged {
            warn!("Fixture did not acknowledge {} mode", mode);
            self.log_message(&format!("Fixture did not acknowledge {} mode", mode));
        }
        acknowledged
    }

    fn log_message(&self, message: &str) {
        if let Some(ref log) = self.log {
            log.log_message(message);
        }
    }

    fn log_error(&self, error: &dyn Error) {
        warn!("{}", error);
        if let Some(ref log) = self.log {
            log.log_error(error);
        }
    }
}
