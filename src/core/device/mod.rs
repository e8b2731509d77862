//! Fixture drivers
//!
//! [`DeviceDriver`] is the seam between the test orchestration and the
//! hardware. [`SerialDevice`] talks to a real fixture; the simulator in
//! [`crate::core::simulator`] implements the same trait.

mod serial;

pub use serial::SerialDevice;

use crate::core::transport::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Events raised by a driver outside of any command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Auto-test reported a passing pin (zero-based)
    PinPassed(usize),
    /// Discovery finished; `true` when a fixture was selected
    DeviceStatus(bool),
}

/// Driver error types.
///
/// These never cross the [`DeviceDriver`] boundary; each operation logs them
/// and reports a plain `bool`.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No port answered the identification handshake
    #[error("No fixture answered the identification request")]
    IdentificationFailed,

    /// Nothing arrived within the settle delay
    #[error("No response to {0}")]
    EmptyResponse(String),

    /// Reply did not match the command's success predicate
    #[error("Unexpected response to {command}: {response:?}")]
    UnexpectedResponse {
        /// Command sent
        command: String,
        /// Cleaned reply
        response: String,
    },

    /// `RESET` was not acknowledged with `INIT`
    #[error("Reset failed: {0}")]
    ResetFailed(String),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Fixed protocol delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    /// Wait between a command and reading its reply
    pub command_settle: Duration,
    /// Wait between `IDEN` and reading its reply
    pub identify_settle: Duration,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            command_settle: Duration::from_millis(250),
            identify_settle: Duration::from_millis(500),
        }
    }
}

/// High-level fixture operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Discover and select a fixture, then reset it. Returns whether one was found.
    async fn initialize(&self) -> bool;

    /// Whether a fixture is currently selected
    fn is_device_found(&self) -> bool;

    /// Open the selected fixture
    async fn open(&self) -> bool;

    /// Close the selected fixture
    async fn close(&self);

    /// `RESET`, expecting `INIT`
    async fn reset(&self) -> bool;

    /// `READ:<pin>`, `true` when the pin has continuity
    async fn test_pin(&self, pin: usize) -> bool;

    /// `AUTO_ON`, expecting `P`
    async fn auto_test_on(&self) -> bool;

    /// `AUTO_OFF`, expecting `P`
    async fn auto_test_off(&self) -> bool;

    /// Subscribe to driver events
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Human readable description of the selected fixture
    fn describe(&self) -> String;
}
