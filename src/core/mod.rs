//! Core module containing the main functionality of Connect112
//!
//! This module provides:
//! - Serial transport with a background notification listener
//! - Fixture protocol vocabulary and framing
//! - Fixture discovery and drivers (serial and simulated)
//! - Test session state machine
//! - Orchestration of test runs
//! - Event log and result export

pub mod device;
pub mod discovery;
pub mod export;
pub mod logger;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod state_machine;
pub mod transport;
