//! # Connect112 Core Library
//!
//! Host side of the Connect112 continuity test fixture, a 112-pin board
//! driven over a serial line:
//! - Port discovery with the `IDEN` / `CONNECT_112` handshake
//! - Line-oriented command protocol (`RESET`, `READ:<n>`, `AUTO_ON`, `AUTO_OFF`)
//! - Asynchronous `PASS:<n>` notifications in auto mode
//! - Test session state machine over all 112 pins
//! - Orchestration of manual and auto runs with single-flight user actions
//! - Event log, CSV export and a simulated fixture
//!
//! ## Example
//!
//! ```rust,no_run
//! use connect112_core::{Orchestrator, SimulatedDevice, SimulatorConfig, TestMode};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let device = Arc::new(SimulatedDevice::new(SimulatorConfig::default()));
//!     let orchestrator = Orchestrator::new(device);
//!
//!     orchestrator.connect().await;
//!     orchestrator.set_mode(TestMode::Auto).await;
//!     orchestrator.start_test().await;
//!
//!     let state = orchestrator.wait_for_run(&CancellationToken::new()).await;
//!     println!("{}", state.banner());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes, OutputFormat};
pub use crate::config::AppConfig;
pub use crate::core::device::{DeviceDriver, DeviceEvent, ProtocolTiming, SerialDevice};
pub use crate::core::logger::EventLog;
pub use crate::core::orchestrator::{ActionOutcome, Orchestrator};
pub use crate::core::session::{Pin, PinResult, SessionEvent, TestMode, TestSession, TOTAL_PINS};
pub use crate::core::simulator::{SimulatedDevice, SimulatorConfig};
pub use crate::core::state_machine::TestState;
pub use crate::core::transport::{SerialConfig, SerialTransport, SystemPorts, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
