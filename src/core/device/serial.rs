//! Driver for a fixture attached to a serial port

use super::{DeviceDriver, DeviceError, DeviceEvent, ProtocolTiming};
use crate::core::discovery::Discovery;
use crate::core::protocol::{parse_pass_notification, Command};
use crate::core::transport::{PortBackend, SerialConfig, SerialTransport, TransportError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Serial fixture driver.
///
/// Owns the single selected [`SerialTransport`]. Every command runs under
/// `command_lock` with notification mode switched off, so commands never
/// overlap each other or the notification listener.
pub struct SerialDevice {
    backend: Arc<dyn PortBackend>,
    config: SerialConfig,
    timing: ProtocolTiming,
    discovery: Discovery,
    selected: RwLock<Option<Arc<SerialTransport>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    command_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<DeviceEvent>,
}

impl SerialDevice {
    /// Create a driver; nothing is opened until [`DeviceDriver::initialize`]
    pub fn new(backend: Arc<dyn PortBackend>, config: SerialConfig, timing: ProtocolTiming) -> Self {
        let (events, _) = broadcast::channel(256);
        let discovery = Discovery::new(backend.clone(), config.clone(), timing.identify_settle);

        Self {
            backend,
            config,
            timing,
            discovery,
            selected: RwLock::new(None),
            forwarder: Mutex::new(None),
            command_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Name of the selected port
    pub fn port_name(&self) -> Option<String> {
        self.selected.read().as_ref().map(|t| t.port_name().to_string())
    }

    fn transport(&self) -> Option<Arc<SerialTransport>> {
        self.selected.read().clone()
    }

    fn select(&self, port: &str) {
        let transport = Arc::new(SerialTransport::new(port, self.config.clone(), self.backend.clone()));
        let mut lines = transport.subscribe();
        let events = self.events.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                match lines.recv().await {
                    Ok(line) => match parse_pass_notification(&line) {
                        Some(pin) => {
                            let _ = events.send(DeviceEvent::PinPassed(pin));
                        }
                        None => debug!("Ignoring notification {:?}", line),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Notification stream lagged, {} lines lost", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(old) = self.forwarder.lock().replace(forwarder) {
            old.abort();
        }
        *self.selected.write() = Some(transport);
    }

    fn release(&self) {
        if let Some(transport) = self.selected.write().take() {
            transport.close();
        }
        if let Some(forwarder) = self.forwarder.lock().take() {
            forwarder.abort();
        }
    }

    /// Disable notifications, write, wait, read, re-enable notifications
    async fn send_command_and_read(&self, command: Command) -> Result<String, DeviceError> {
        let transport = self.transport().ok_or(TransportError::NotConnected)?;
        let _exclusive = self.command_lock.lock().await;

        transport.set_listening(false);
        transport.write_line(&command.to_string());
        let response = transport.read_response(self.timing.command_settle).await;
        transport.set_listening(true);

        debug!("{} -> {:?}", command, response);
        Ok(response)
    }

    async fn expect_ack(&self, command: Command) -> Result<(), DeviceError> {
        let response = self.send_command_and_read(command).await?;
        if response.is_empty() {
            return Err(DeviceError::EmptyResponse(command.to_string()));
        }
        if !command.accepts(&response) {
            return Err(DeviceError::UnexpectedResponse {
                command: command.to_string(),
                response,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceDriver for SerialDevice {
    async fn initialize(&self) -> bool {
        self.release();

        let Some(port) = self.discovery.discover().await else {
            warn!("{}", DeviceError::IdentificationFailed);
            let _ = self.events.send(DeviceEvent::DeviceStatus(false));
            return false;
        };

        self.select(&port);
        let _ = self.events.send(DeviceEvent::DeviceStatus(true));

        // A fixture that misses the reset is still usable
        if self.open().await && !self.reset().await {
            warn!("Continuing without a confirmed reset on {}", port);
        }
        true
    }

    fn is_device_found(&self) -> bool {
        self.selected.read().is_some()
    }

    async fn open(&self) -> bool {
        let Some(transport) = self.transport() else {
            return false;
        };

        match transport.open() {
            Ok(()) => {
                transport.set_listening(true);
                true
            }
            Err(e) => {
                warn!("Cannot open {}: {}", transport.port_name(), e);
                false
            }
        }
    }

    async fn close(&self) {
        if let Some(transport) = self.transport() {
            let _exclusive = self.command_lock.lock().await;
            transport.close();
        }
    }

    async fn reset(&self) -> bool {
        match self.expect_ack(Command::Reset).await {
            Ok(()) => {
                info!("Fixture reset");
                true
            }
            Err(DeviceError::UnexpectedResponse { response, .. }) => {
                warn!("{}", DeviceError::ResetFailed(response));
                false
            }
            Err(e) => {
                warn!("Reset failed: {}", e);
                false
            }
        }
    }

    async fn test_pin(&self, pin: usize) -> bool {
        match self.send_command_and_read(Command::ReadPin(pin)).await {
            Ok(response) => {
                if response.is_empty() {
                    debug!("{}", DeviceError::EmptyResponse(Command::ReadPin(pin).to_string()));
                }
                Command::ReadPin(pin).accepts(&response)
            }
            Err(e) => {
                warn!("Pin {} read failed: {}", pin, e);
                false
            }
        }
    }

    async fn auto_test_on(&self) -> bool {
        match self.expect_ack(Command::AutoOn).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Enabling auto-test failed: {}", e);
                false
            }
        }
    }

    async fn auto_test_off(&self) -> bool {
        match self.expect_ack(Command::AutoOff).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Disabling auto-test failed: {}", e);
                false
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    fn describe(&self) -> String {
        match self.port_name() {
            Some(port) => format!("{} @ {}", port, self.config.describe()),
            None => "no fixture".to_string(),
        }
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::mock::{MockPorts, Script};
    use std::time::Duration;

    fn fixture() -> Script {
        Script::default()
            .reply("IDEN", "CONNECT_112\r\n")
            .reply("RESET", "INIT\r\n")
            .reply("READ:4", "1\r\n")
            .reply("READ:5", "0\r\n")
            .reply("AUTO_ON", "P\r\n")
            .reply("AUTO_OFF", "P\r\n")
    }

    fn device(ports: &Arc<MockPorts>) -> SerialDevice {
        SerialDevice::new(ports.clone(), SerialConfig::default(), ProtocolTiming::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_selects_and_resets() {
        let ports = Arc::new(MockPorts::default().with_port("COM5", fixture()));
        let device = device(&ports);
        let mut events = device.subscribe();

        assert!(device.initialize().await);
        assert!(device.is_device_found());
        assert_eq!(device.port_name().as_deref(), Some("COM5"));
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::DeviceStatus(true));
        assert_eq!(
            ports.written("COM5"),
            vec!["IDEN\n".to_string(), "RESET\n".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_tolerates_failed_reset() {
        let script = Script::default().reply("IDEN", "CONNECT_112").reply("RESET", "BUSY");
        let ports = Arc::new(MockPorts::default().with_port("COM5", script));
        let device = device(&ports);

        assert!(device.initialize().await);
        assert!(device.is_device_found());
        assert!(!device.reset().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_without_fixture() {
        let ports = Arc::new(MockPorts::default().with_port("COM3", Script::default()));
        let device = device(&ports);
        let mut events = device.subscribe();

        assert!(!device.initialize().await);
        assert!(!device.is_device_found());
        assert_eq!(events.try_recv().unwrap(), DeviceEvent::DeviceStatus(false));
        assert_eq!(device.describe(), "no fixture");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pin_reads() {
        let ports = Arc::new(MockPorts::default().with_port("COM5", fixture()));
        let device = device(&ports);
        device.initialize().await;

        assert!(device.test_pin(4).await);
        assert!(!device.test_pin(5).await);
        // No scripted reply: empty response counts as a failed read
        assert!(!device.test_pin(6).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_mode_commands() {
        let ports = Arc::new(MockPorts::default().with_port("COM5", fixture()));
        let device = device(&ports);
        device.initialize().await;

        assert!(device.auto_test_on().await);
        assert!(device.auto_test_off().await);
        let written = ports.written("COM5");
        assert_eq!(&written[written.len() - 2..], ["AUTO_ON\n", "AUTO_OFF\n"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_without_fixture_fail() {
        let ports = Arc::new(MockPorts::default());
        let device = device(&ports);

        assert!(!device.open().await);
        assert!(!device.reset().await);
        assert!(!device.test_pin(0).await);
        assert!(!device.auto_test_on().await);
        device.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_handle_reads_fail() {
        let ports = Arc::new(MockPorts::default().with_port("COM5", fixture()));
        let device = device(&ports);
        device.initialize().await;
        device.close().await;

        assert!(!device.test_pin(4).await);
        assert!(device.open().await);
        assert!(device.test_pin(4).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_notifications_become_events() {
        let ports = Arc::new(MockPorts::default().with_port("COM5", fixture()));
        let device = device(&ports);
        device.initialize().await;
        let mut events = device.subscribe();

        ports.inject("COM5", b"PASS:7\nGARBAGE\npass:8\n");

        let first = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert_eq!(first, DeviceEvent::PinPassed(7));
        assert_eq!(second, DeviceEvent::PinPassed(8));
    }
}
