//! Fixture discovery
//!
//! Probes serial ports in enumeration order with the identification
//! handshake and stops at the first port that answers. Multiple fixtures
//! are not disambiguated.

use crate::core::protocol::Command;
use crate::core::transport::{PortBackend, SerialConfig, SerialTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identification prober
pub struct Discovery {
    backend: Arc<dyn PortBackend>,
    config: SerialConfig,
    identify_settle: Duration,
}

impl Discovery {
    /// Create a prober using `identify_settle` as the reply wait
    pub fn new(backend: Arc<dyn PortBackend>, config: SerialConfig, identify_settle: Duration) -> Self {
        Self {
            backend,
            config,
            identify_settle,
        }
    }

    /// Candidate ports, deduplicated, in enumeration order
    pub fn enumerate(&self) -> Vec<String> {
        let ports = match self.backend.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Port enumeration failed: {}", e);
                return Vec::new();
            }
        };

        let mut unique: Vec<String> = Vec::with_capacity(ports.len());
        for port in ports {
            if !unique.contains(&port) {
                unique.push(port);
            }
        }
        unique
    }

    /// Send `IDEN` to `port` and check the reply. The port is closed again
    /// whatever the outcome.
    pub async fn identify(&self, port: &str) -> bool {
        let transport = SerialTransport::new(port, self.config.clone(), self.backend.clone());
        if let Err(e) = transport.open() {
            debug!("Skipping {}: {}", port, e);
            return false;
        }

        transport.set_listening(false);
        transport.write_line(&Command::Identify.to_string());
        let response = transport.read_response(self.identify_settle).await;
        transport.close();

        let identified = Command::Identify.accepts(&response);
        debug!("{} answered {:?} (identified: {})", port, response, identified);
        identified
    }

    /// First port that identifies as a fixture
    pub async fn discover(&self) -> Option<String> {
        for port in self.enumerate() {
            if self.identify(&port).await {
                info!("Fixture found on {}", port);
                return Some(port);
            }
        }

        info!("No fixture found");
        None
    }
}
