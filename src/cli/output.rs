//! Output rendering
//!
//! Human readable text for terminals, one JSON document per line for scripts.

use crate::core::session::{Pin, PinResult, SessionEvent, SessionSummary};
use clap::ValueEnum;
use serde::Serialize;

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format for scripting
    Json,
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Render the list of serial ports
pub fn format_ports(ports: &[String], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(ports),
        OutputFormat::Text if ports.is_empty() => "No serial ports found.".to_string(),
        OutputFormat::Text => ports.join("\n"),
    }
}

/// Render a session event. Scroll hints have no text form.
pub fn format_event(event: &SessionEvent, format: OutputFormat) -> Option<String> {
    if format == OutputFormat::Json {
        return Some(json(event));
    }

    match event {
        SessionEvent::StateChanged(state) => Some(format!("== {}", state.banner())),
        SessionEvent::PinUpdated(pin) => Some(format!("Pin {:>3}: {}", pin.name(), pin.result())),
        SessionEvent::ScrollToPin(_) => None,
        SessionEvent::DeviceStatus(true) => Some("Device found".to_string()),
        SessionEvent::DeviceStatus(false) => Some("No device found".to_string()),
    }
}

/// Render run totals
pub fn format_summary(summary: &SessionSummary, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => json(summary),
        OutputFormat::Text => {
            let name = if summary.name.is_empty() {
                "(unnamed)"
            } else {
                summary.name.as_str()
            };
            format!(
                "Test {} [{} mode]: {}\n  Passed:   {}\n  Failed:   {}\n  Untested: {}",
                name,
                summary.mode,
                summary.state.banner(),
                summary.passed,
                summary.failed,
                summary.untested
            )
        }
    }
}

fn result_mark(result: PinResult) -> char {
    match result {
        PinResult::Untested => '.',
        PinResult::Pass => 'P',
        PinResult::Fail => 'F',
    }
}

/// Render every pin, eight to a row, with the selected pin bracketed
pub fn format_pin_table(pins: &[Pin], selected: Option<usize>, format: OutputFormat) -> String {
    if format == OutputFormat::Json {
        return json(pins);
    }

    pins.chunks(8)
        .map(|row| {
            row.iter()
                .map(|pin| {
                    let mark = result_mark(pin.result());
                    if selected == Some(pin.index()) {
                        format!("[{:>3}:{}]", pin.name(), mark)
                    } else {
                        format!(" {:>3}:{} ", pin.name(), mark)
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
