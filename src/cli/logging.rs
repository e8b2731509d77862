//! Diagnostic logging
//!
//! Diagnostics go to stderr so stdout stays parseable. When the CLI renders
//! JSON, diagnostics are JSON lines as well.

use super::OutputFormat;
use tracing::Subscriber;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

/// Level filter from the verbosity flags; `RUST_LOG` wins when set
pub fn level_filter(verbose: bool, quiet: bool) -> EnvFilter {
    let level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Formatting layer for the given output format
pub fn log_layer<S, W>(format: OutputFormat, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        OutputFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        OutputFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    }
}
