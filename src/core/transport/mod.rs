//! Serial transport for the fixture link
//!
//! [`SerialTransport`] owns one port and offers two mutually exclusive ways
//! of talking to it:
//! - command/response: write a line, wait a fixed settle delay, drain
//!   whatever arrived
//! - notification mode: a background task assembles inbound lines and
//!   broadcasts them to subscribers
//!
//! The OS port sits behind [`PortBackend`] and [`SerialLink`] so the same
//! code runs against real hardware and in-memory fakes.

mod serial;

pub use serial::{SerialConfig, SerialFlowControl, SerialParity, SystemPorts};

use crate::core::protocol::{clean_response, LineAssembler};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Port does not exist
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port exists but could not be opened (busy, unplugged mid-open, ...)
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    /// No port is open
    #[error("Not connected")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// An open byte link to the fixture
pub trait SerialLink: Send {
    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Return every byte currently buffered by the driver without blocking
    fn read_available(&mut self) -> io::Result<Vec<u8>>;
}

/// Source of serial ports
pub trait PortBackend: Send + Sync {
    /// Names of the ports present on the system
    fn available_ports(&self) -> Result<Vec<String>, TransportError>;

    /// Open `port` with the given line settings
    fn open(&self, port: &str, config: &SerialConfig) -> Result<Box<dyn SerialLink>, TransportError>;
}

type SharedLink = Arc<Mutex<Option<Box<dyn SerialLink>>>>;

/// Handle to a single fixture port
pub struct SerialTransport {
    port_name: String,
    config: SerialConfig,
    backend: Arc<dyn PortBackend>,
    link: SharedLink,
    listening: Arc<AtomicBool>,
    lines_tx: broadcast::Sender<String>,
    listener: Mutex<Option<CancellationToken>>,
}

impl SerialTransport {
    /// Create a closed transport for `port_name`
    pub fn new(port_name: &str, config: SerialConfig, backend: Arc<dyn PortBackend>) -> Self {
        let (lines_tx, _) = broadcast::channel(256);

        Self {
            port_name: port_name.to_string(),
            config,
            backend,
            link: Arc::new(Mutex::new(None)),
            listening: Arc::new(AtomicBool::new(false)),
            lines_tx,
            listener: Mutex::new(None),
        }
    }

    /// Port this transport talks to
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Line settings
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Check if the port is open
    pub fn is_open(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Open the port. Opening an open port is a no-op.
    pub fn open(&self) -> Result<(), TransportError> {
        let mut link = self.link.lock();
        if link.is_some() {
            return Ok(());
        }

        *link = Some(self.backend.open(&self.port_name, &self.config)?);
        debug!("Opened {} ({})", self.port_name, self.config.describe());
        Ok(())
    }

    /// Close the port if open and stop the notification listener
    pub fn close(&self) {
        if let Some(token) = self.listener.lock().take() {
            token.cancel();
        }

        let mut link = self.link.lock();
        self.listening.store(false, Ordering::Release);
        if link.take().is_some() {
            debug!("Closed {}", self.port_name);
        }
    }

    /// Write `command` followed by a single `\n`.
    ///
    /// Failures are logged only; the caller sees them as an empty response.
    pub fn write_line(&self, command: &str) {
        let mut guard = self.link.lock();
        let Some(link) = guard.as_mut() else {
            warn!("Cannot send {:?}: {} is not open", command, self.port_name);
            return;
        };

        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(b'\n');

        if let Err(e) = link.write_all(&frame) {
            warn!("Write to {} failed: {}", self.port_name, e);
        }
    }

    /// Wait `settle`, then drain and clean everything that arrived.
    ///
    /// Returns an empty string when nothing arrived or the port is closed.
    pub async fn read_response(&self, settle: Duration) -> String {
        tokio::time::sleep(settle).await;

        let mut guard = self.link.lock();
        let Some(link) = guard.as_mut() else {
            return String::new();
        };

        match link.read_available() {
            Ok(bytes) => clean_response(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                warn!("Read from {} failed: {}", self.port_name, e);
                String::new()
            }
        }
    }

    /// Switch notification mode on or off.
    ///
    /// The flag flips under the port lock, so once this returns with `false`
    /// the listener is not in the middle of a read.
    pub fn set_listening(&self, enabled: bool) {
        {
            let _link = self.link.lock();
            self.listening.store(enabled, Ordering::Release);
        }

        if enabled {
            self.ensure_listener();
        }
    }

    /// Whether notification mode is on
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Subscribe to lines received in notification mode
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.lines_tx.subscribe()
    }

    fn ensure_listener(&self) {
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|token| !token.is_cancelled()) || !self.is_open() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime; notifications from {} are disabled", self.port_name);
            return;
        };

        let token = CancellationToken::new();
        *listener = Some(token.clone());

        let port_name = self.port_name.clone();
        let link = self.link.clone();
        let listening = self.listening.clone();
        let lines_tx = self.lines_tx.clone();
        let poll = self.config.poll_interval();

        runtime.spawn(async move {
            let mut assembler = LineAssembler::new();
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let received = {
                    let mut guard = link.lock();
                    if !listening.load(Ordering::Acquire) {
                        continue;
                    }
                    match guard.as_mut() {
                        Some(link) => link.read_available(),
                        None => break,
                    }
                };

                match received {
                    Ok(bytes) if !bytes.is_empty() => {
                        for line in assembler.push(&bytes) {
                            debug!("{} notification: {}", port_name, line);
                            let _ = lines_tx.send(line);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Notification read from {} failed: {}", port_name, e),
                }
            }

            token.cancel();
            debug!("Notification listener for {} stopped", port_name);
        });
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if let Some(token) = self.listener.lock().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory fixture used by transport, discovery and driver tests

    use super::*;
    use std::collections::{HashMap, VecDeque};

    /// Scripted replies keyed by command text
    #[derive(Default, Clone)]
    pub struct Script {
        pub replies: HashMap<String, String>,
    }

    impl Script {
        pub fn reply(mut self, command: &str, response: &str) -> Self {
            self.replies.insert(command.to_string(), response.to_string());
            self
        }
    }

    #[derive(Default)]
    pub struct LinkState {
        pub inbound: VecDeque<u8>,
        pub written: Vec<String>,
        pub open_count: usize,
        pub close_count: usize,
    }

    pub struct MockLink {
        script: Script,
        state: Arc<Mutex<LinkState>>,
    }

    impl Drop for MockLink {
        fn drop(&mut self) {
            self.state.lock().close_count += 1;
        }
    }

    impl SerialLink for MockLink {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(data).to_string();
            let command = text.trim_end_matches('\n').to_string();
            let mut state = self.state.lock();
            if let Some(reply) = self.script.replies.get(&command) {
                state.inbound.extend(reply.as_bytes());
            }
            state.written.push(text);
            Ok(())
        }

        fn read_available(&mut self) -> io::Result<Vec<u8>> {
            Ok(self.state.lock().inbound.drain(..).collect())
        }
    }

    /// Fake set of ports, each with its own script and shared state
    #[derive(Default)]
    pub struct MockPorts {
        pub names: Vec<String>,
        pub scripts: HashMap<String, Script>,
        pub states: Mutex<HashMap<String, Arc<Mutex<LinkState>>>>,
        pub unavailable: Vec<String>,
    }

    impl MockPorts {
        pub fn with_port(mut self, name: &str, script: Script) -> Self {
            self.names.push(name.to_string());
            self.scripts.insert(name.to_string(), script);
            self
        }

        pub fn state(&self, name: &str) -> Arc<Mutex<LinkState>> {
            self.states.lock().entry(name.to_string()).or_default().clone()
        }

        /// Queue bytes as if the fixture had sent them unprompted
        pub fn inject(&self, name: &str, data: &[u8]) {
            self.state(name).lock().inbound.extend(data);
        }

        pub fn written(&self, name: &str) -> Vec<String> {
            self.state(name).lock().written.clone()
        }
    }

    impl PortBackend for MockPorts {
        fn available_ports(&self) -> Result<Vec<String>, TransportError> {
            Ok(self.names.clone())
        }

        fn open(&self, port: &str, _config: &SerialConfig) -> Result<Box<dyn SerialLink>, TransportError> {
            if self.unavailable.iter().any(|p| p == port) {
                return Err(TransportError::PortUnavailable(port.to_string()));
            }
            let script = self
                .scripts
                .get(port)
                .cloned()
                .ok_or_else(|| TransportError::PortNotFound(port.to_string()))?;
            let state = self.state(port);
            state.lock().open_count += 1;
            Ok(Box::new(MockLink { script, state }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockPorts, Script};
    use super::*;

    fn transport(ports: &Arc<MockPorts>) -> SerialTransport {
        SerialTransport::new("COM3", SerialConfig::default(), ports.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_is_idempotent() {
        let ports = Arc::new(MockPorts::default().with_port("COM3", Script::default()));
        let t = transport(&ports);

        t.open().unwrap();
        t.open().unwrap();
        assert!(t.is_open());
        assert_eq!(ports.state("COM3").lock().open_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_releases_link_once() {
        let ports = Arc::new(MockPorts::default().with_port("COM3", Script::default()));
        let t = transport(&ports);

        t.open().unwrap();
        t.close();
        t.close();
        assert!(!t.is_open());
        assert_eq!(ports.state("COM3").lock().close_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_without_open_is_noop() {
        let ports = Arc::new(MockPorts::default());
        let t = transport(&ports);

        assert!(t.open().is_err());
        t.close();
        t.close();
        assert!(!t.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_appends_newline_and_read_cleans() {
        let ports = Arc::new(
            MockPorts::default().with_port("COM3", Script::default().reply("READ:1", "  1\r\n\0")),
        );
        let t = transport(&ports);
        t.open().unwrap();

        t.write_line("READ:1");
        let response = t.read_response(Duration::from_millis(250)).await;

        assert_eq!(response, "1");
        assert_eq!(ports.written("COM3"), vec!["READ:1\n".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_port_reads_empty() {
        let ports = Arc::new(MockPorts::default().with_port("COM3", Script::default()));
        let t = transport(&ports);

        t.write_line("RESET");
        assert_eq!(t.read_response(Duration::from_millis(250)).await, "");
        assert!(ports.written("COM3").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_lines_are_broadcast() {
        let ports = Arc::new(MockPorts::default().with_port("COM3", Script::default()));
        let t = transport(&ports);
        t.open().unwrap();
        let mut rx = t.subscribe();

        t.set_listening(true);
        ports.inject("COM3", b"PASS:1");
        ports.inject("COM3", b"2\r\n");

        let line = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line, "PASS:12");
        t.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_leaves_port_alone_when_disabled() {
        let ports = Arc::new(MockPorts::default().with_port("COM3", Script::default()));
        let t = transport(&ports);
        t.open().unwrap();
        let mut rx = t.subscribe();

        t.set_listening(true);
        t.set_listening(false);
        ports.inject("COM3", b"INIT\n");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(t.read_response(Duration::ZERO).await, "INIT");
        t.close();
    }
}
