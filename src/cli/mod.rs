//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Text and JSON rendering of session output
//! - Diagnostic logging in the matching format

pub mod exit_codes;
pub mod logging;
pub mod output;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use logging::{level_filter, log_layer};
pub use output::{format_event, format_pin_table, format_ports, format_summary, OutputFormat};
