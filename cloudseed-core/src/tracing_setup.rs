//! Tracing setup for Cloudseed
//!
//! Console output at a user-chosen level, plus a full trace of the last run
//! written to disk.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File the last run's trace is written to, inside the logs directory.
pub const LAST_RUN_LOG: &str = "cloudseed-last-run.log";

/// Crates whose events the console shows at the chosen level.
const PROJECT_TARGETS: [&str; 2] = ["cloudseed_core", "cloudseed"];

/// Console directives: dependencies at `warn`, project crates at `level`.
fn console_directives(level: Level) -> String {
    let level = level.to_string().to_lowercase();
    PROJECT_TARGETS
        .iter()
        .fold(String::from("warn"), |directives, target| {
            format!("{directives},{target}={level}")
        })
}

/// Initialize tracing with a console layer and a trace-level file layer.
///
/// The console shows project events at `console_level` and dependency
/// events at `warn`; `RUST_LOG` overrides both. The file at
/// `<logs_dir>/cloudseed-last-run.log` is truncated on every run; `logs_dir`
/// defaults to `./logs`.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - If the logs directory cannot be created
///   or the log file cannot be opened for writing
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(LAST_RUN_LOG);
    let log_file = File::create(&log_file_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        "Tracing initialized: console={}, trace_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(())
}

/// Log levels selectable on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
