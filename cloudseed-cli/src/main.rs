//! Cloudseed CLI - Command-line interface
//!
//! Runs the registry engine against the simulated client. Added descriptors
//! persist in the client's cache directory between invocations.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use cloudseed_core::CloudseedError;
use cloudseed_core::tracing_setup::{LogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "cloudseed")]
#[command(about = "Torrent registry for a torrent-serving process")]
struct Cli {
    #[command(flatten)]
    engine: commands::EngineArgs,

    /// Console log level
    #[arg(long, value_enum, default_value_t = LogLevel::Warn, global = true)]
    log_level: LogLevel,

    /// Directory for the full trace of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let config = cli.engine.into_config();
    if let Err(e) = commands::handle_command(config, cli.command).await {
        tracing::debug!("Command failed: {e:?}");
        match e.downcast_ref::<CloudseedError>() {
            Some(err) if err.is_user_error() => eprintln!("Error: {}", err.user_message()),
            _ => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cloudseed",
            "list",
            "--port",
            "6881",
            "--no-seed",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level, LogLevel::Debug);
        let config = cli.engine.into_config();
        assert_eq!(config.incoming_port, 6881);
        assert!(!config.enable_seeding);
        assert!(config.enable_upload);
    }
}
