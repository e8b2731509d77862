//! Connect112 CLI
//!
//! Discovers the fixture and runs manual or auto continuity tests from the
//! terminal.

use anyhow::Context;
use clap::{Parser, Subcommand};
use connect112_core::cli::{
    format_event, format_pin_table, format_ports, format_summary, level_filter, log_layer,
    print_exit_codes, CliResult, ExitCodes, OutputFormat,
};
use connect112_core::config::{self, AppConfig};
use connect112_core::core::device::{DeviceDriver, SerialDevice};
use connect112_core::core::discovery::Discovery;
use connect112_core::core::export::default_file_name;
use connect112_core::core::logger::EventLog;
use connect112_core::core::orchestrator::{ActionOutcome, Orchestrator};
use connect112_core::core::session::{SessionEvent, TestMode};
use connect112_core::core::simulator::SimulatedDevice;
use connect112_core::core::state_machine::TestState;
use connect112_core::core::transport::{PortBackend, SystemPorts};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Connect112 CLI
#[derive(Parser, Debug)]
#[command(
    name = "connect112",
    version,
    about = "Connect112 continuity test fixture controller",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "CONNECT112_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Find the port the fixture is attached to
    Discover,

    /// Run a continuity test
    Run {
        /// Test mode (manual, auto); defaults to the configured mode
        #[arg(short, long)]
        mode: Option<TestMode>,

        /// Use the simulated fixture
        #[arg(long)]
        simulate: bool,

        /// Test name
        #[arg(short, long)]
        name: Option<String>,

        /// Write results as CSV (file or directory)
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Stop without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show exit codes
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_exit_code(&e));
        }
    };
    init_tracing(&cli);

    match run(&cli).await {
        Ok(result) => {
            match (&result, result.message()) {
                (CliResult::Success(_), Some(msg)) if !cli.quiet => eprintln!("{}", msg),
                (CliResult::Error(..), Some(msg)) => eprintln!("Error: {}", msg),
                _ => {}
            }
            result.to_exit_code()
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(ExitCodes::ERROR)
        }
    }
}

/// `--help` and `--version` are not failures
fn parse_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::SUCCESS
    }
}

fn init_tracing(cli: &Cli) {
    tracing_subscriber::registry()
        .with(level_filter(cli.verbose, cli.quiet))
        .with(log_layer(cli.format, std::io::stderr))
        .init();
}

fn config_path(cli: &Cli) -> Option<PathBuf> {
    cli.config.clone().or_else(config::config_file)
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    if let Commands::ExitCodes = cli.command {
        print_exit_codes();
        return Ok(CliResult::success());
    }

    let config = match config_path(cli).map(|path| AppConfig::load_from(&path)) {
        Some(Ok(config)) => config,
        Some(Err(e)) => return Ok(CliResult::error(ExitCodes::CONFIG_ERROR, e.to_string())),
        None => AppConfig::default(),
    };

    match &cli.command {
        Commands::ListPorts => list_ports(cli),
        Commands::Discover => discover(cli, &config).await,
        Commands::Run {
            mode,
            simulate,
            name,
            export,
            yes,
        } => {
            let options = RunOptions {
                mode: mode.unwrap_or(config.test.default_mode),
                simulate: *simulate,
                name: name.as_deref(),
                export: export.as_deref(),
                confirm_stop: config.test.confirm_stop && !*yes,
            };
            run_test(cli, &config, options).await
        }
        Commands::Config { action } => handle_config(cli, &config, action),
        Commands::ExitCodes => Ok(CliResult::success()),
    }
}

fn list_ports(cli: &Cli) -> anyhow::Result<CliResult> {
    match SystemPorts.available_ports() {
        Ok(ports) => {
            println!("{}", format_ports(&ports, cli.format));
            Ok(CliResult::success())
        }
        Err(e) => Ok(CliResult::from(e)),
    }
}

async fn discover(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let discovery = Discovery::new(
        Arc::new(SystemPorts),
        config.device.serial.clone(),
        config.device.timing().identify_settle,
    );

    match discovery.discover().await {
        Some(port) => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "port": port })),
                OutputFormat::Text => println!("{}", port),
            }
            Ok(CliResult::success())
        }
        None => Ok(CliResult::device_not_found()),
    }
}

struct RunOptions<'a> {
    mode: TestMode,
    simulate: bool,
    name: Option<&'a str>,
    export: Option<&'a Path>,
    confirm_stop: bool,
}

async fn run_test(cli: &Cli, config: &AppConfig, options: RunOptions<'_>) -> anyhow::Result<CliResult> {
    let driver: Arc<dyn DeviceDriver> = if options.simulate {
        Arc::new(SimulatedDevice::new(config.simulator.clone()))
    } else {
        Arc::new(SerialDevice::new(
            Arc::new(SystemPorts),
            config.device.serial.clone(),
            config.device.timing(),
        ))
    };

    let mut orchestrator = Orchestrator::new(driver);
    if let Some(path) = config.log_path() {
        let log = Arc::new(EventLog::open(&path));
        log.log_message("Application started");
        orchestrator = orchestrator.with_log(log);
    }

    let done = CancellationToken::new();
    let printer = spawn_printer(orchestrator.subscribe(), cli.format, cli.quiet, done.clone());

    let interrupt = CancellationToken::new();
    let handler_token = interrupt.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("Failed to install Ctrl+C handler")?;

    if !orchestrator.connect().await {
        finish_printer(done, printer).await;
        return Ok(CliResult::device_not_found());
    }

    if let Some(name) = options.name {
        orchestrator.set_name(name).await;
    }
    orchestrator.set_mode(options.mode).await;
    orchestrator.start_test().await;

    let state = match options.mode {
        TestMode::Auto => auto_loop(&orchestrator, &interrupt).await,
        TestMode::Manual => manual_loop(cli, &orchestrator, &interrupt, options.confirm_stop).await?,
    };
    tracing::debug!("Run finished in state {}", state);

    let export_failure = match options.export {
        Some(target) => export_results(&orchestrator, target).await,
        None => None,
    };

    orchestrator.shutdown().await;
    finish_printer(done, printer).await;

    let summary = orchestrator.summary().await;
    println!("{}", format_summary(&summary, cli.format));
    Ok(export_failure.unwrap_or_else(|| CliResult::from_run(summary.state, summary.failed)))
}

/// Export the pin table; an I/O failure becomes the run's result
async fn export_results(orchestrator: &Orchestrator, target: &Path) -> Option<CliResult> {
    let path = export_path(target, &orchestrator.name().await);
    match orchestrator.export(&path).await {
        Ok(_) => None,
        Err(e) => {
            eprintln!("Failed to export results to {}", path.display());
            Some(CliResult::from(e))
        }
    }
}

fn export_path(target: &Path, test_name: &str) -> PathBuf {
    if target.is_dir() {
        target.join(default_file_name(test_name))
    } else {
        target.to_path_buf()
    }
}

fn spawn_printer(
    mut events: broadcast::Receiver<SessionEvent>,
    format: OutputFormat,
    quiet: bool,
    done: CancellationToken,
) -> JoinHandle<()> {
    let print = move |event: &SessionEvent| {
        if quiet {
            return;
        }
        if let Some(line) = format_event(event, format) {
            println!("{}", line);
        }
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Ok(event) => print(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                _ = done.cancelled() => {
                    while let Ok(event) = events.try_recv() {
                        print(&event);
                    }
                    break;
                }
            }
        }
    })
}

async fn finish_printer(done: CancellationToken, printer: JoinHandle<()>) {
    done.cancel();
    let _ = printer.await;
}

async fn auto_loop(orchestrator: &Orchestrator, interrupt: &CancellationToken) -> TestState {
    eprintln!("Auto test running. Press Ctrl+C to stop.");

    let state = orchestrator.wait_for_run(interrupt).await;
    if state.is_running() {
        orchestrator.stop_test(|| true).await;
    }
    orchestrator.state().await
}

async fn manual_loop(
    cli: &Cli,
    orchestrator: &Orchestrator,
    interrupt: &CancellationToken,
    confirm_stop: bool,
) -> anyhow::Result<TestState> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Enter: test selected pin | <n>: test pin n | t: show pins | q: stop");

    while orchestrator.state().await.is_running() {
        if let Some(pin) = orchestrator.selected_index().await {
            eprintln!("Selected pin {}", pin + 1);
        }

        let line = tokio::select! {
            _ = interrupt.cancelled() => None,
            line = input.next_line() => line.context("Failed to read input")?,
        };
        let Some(line) = line else {
            orchestrator.stop_test(|| true).await;
            break;
        };

        let outcome = match line.trim() {
            "" => orchestrator.test_selected_pin().await,
            "t" | "table" => {
                let pins = orchestrator.pins().await;
                let selected = orchestrator.selected_index().await;
                println!("{}", format_pin_table(&pins, selected, cli.format));
                continue;
            }
            "q" | "quit" | "stop" => {
                let confirmed = !confirm_stop || ask(&mut input, "Stop the running test? [y/N]").await?;
                orchestrator.stop_test(|| confirmed).await
            }
            other => match other.parse::<usize>() {
                Ok(pin) if pin >= 1 => orchestrator.test_pin(pin - 1).await,
                _ => {
                    eprintln!("Unknown input: {}", other);
                    continue;
                }
            },
        };

        if outcome == ActionOutcome::Rejected {
            eprintln!("Busy, try again");
        }
    }

    Ok(orchestrator.state().await)
}

async fn ask(input: &mut Lines<BufReader<Stdin>>, question: &str) -> anyhow::Result<bool> {
    eprintln!("{}", question);
    let answer = input.next_line().await.context("Failed to read input")?;
    Ok(matches!(
        answer.as_deref().map(str::trim),
        Some("y" | "Y" | "yes")
    ))
}

fn handle_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> anyhow::Result<CliResult> {
    match action {
        ConfigAction::Show => {
            let rendered = match cli.format {
                OutputFormat::Json => serde_json::to_string_pretty(config)?,
                OutputFormat::Text => toml::to_string_pretty(config)?,
            };
            println!("{}", rendered);
        }
        ConfigAction::Path => match config_path(cli) {
            Some(path) => println!("{}", path.display()),
            None => {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    "Could not determine config directory",
                ))
            }
        },
        ConfigAction::Init { force } => {
            let Some(path) = config_path(cli) else {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    "Could not determine config directory",
                ));
            };
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists (use --force to overwrite)", path.display()),
                ));
            }
            if let Err(e) = AppConfig::default().save_to(&path) {
                return Ok(CliResult::error(ExitCodes::CONFIG_ERROR, e.to_string()));
            }
            return Ok(CliResult::success_with_message(format!("Wrote {}", path.display())));
        }
    }
    Ok(CliResult::success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use connect112_core::core::simulator::SimulatorConfig;
    use tempfile::TempDir;

    #[test]
    fn test_bad_arguments_exit_with_invalid_args() {
        let err = Cli::try_parse_from(["connect112", "run", "--mode", "sideways"]).unwrap_err();
        assert_eq!(parse_exit_code(&err), ExitCodes::INVALID_ARGS);

        let err = Cli::try_parse_from(["connect112", "--help"]).unwrap_err();
        assert_eq!(parse_exit_code(&err), ExitCodes::SUCCESS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_failure_maps_to_exit_code() {
        let dir = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(Arc::new(SimulatedDevice::new(SimulatorConfig::default())));
        orchestrator.connect().await;

        let missing = dir.path().join("missing").join("results.csv");
        let result = export_results(&orchestrator, &missing).await.unwrap();
        assert_eq!(result.code(), ExitCodes::FILE_NOT_FOUND);

        let written = dir.path().join("results.csv");
        assert!(export_results(&orchestrator, &written).await.is_none());
        assert!(written.exists());
    }
}
