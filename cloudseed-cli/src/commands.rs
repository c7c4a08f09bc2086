//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand};
use cloudseed_core::sim::SimulatedClientFactory;
use cloudseed_core::{CloudseedError, Engine, EngineConfig, EngineError, NetworkHash};
use serde::Serialize;

/// Engine settings; unset options fall back to `CLOUDSEED_*` environment
/// variables, then to defaults.
#[derive(Args)]
pub struct EngineArgs {
    /// Directory torrent data is stored in
    #[arg(long, global = true)]
    download_dir: Option<PathBuf>,

    /// Port the client listens on
    #[arg(long, global = true, allow_negative_numbers = true)]
    port: Option<i32>,

    /// Do not upload to peers
    #[arg(long, global = true)]
    no_upload: bool,

    /// Stop sharing torrents once complete
    #[arg(long, global = true)]
    no_seed: bool,

    /// Disable protocol encryption
    #[arg(long, global = true)]
    no_encryption: bool,
}

impl EngineArgs {
    pub fn into_config(self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if let Some(dir) = self.download_dir {
            config.download_directory = dir;
        }
        if let Some(port) = self.port {
            config.incoming_port = port;
        }
        config.enable_upload &= !self.no_upload;
        config.enable_seeding &= !self.no_seed;
        config.enable_encryption &= !self.no_encryption;
        config
    }
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Add torrents from magnet links or descriptor files
    Add {
        /// Magnet links or paths to .torrent files
        #[arg(required = true)]
        sources: Vec<String>,
    },
    /// List all torrents
    List,
    /// Show one torrent
    Show {
        /// Hex info hash
        hash: String,
    },
    /// Remove a torrent and forget its cached descriptor
    Remove {
        /// Hex info hash
        hash: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// - `CloudseedError` - The engine rejected the configuration or request
/// - Any error writing the JSON output
pub async fn handle_command(config: EngineConfig, command: Commands) -> anyhow::Result<()> {
    let engine = open_engine(config).await?;

    match command {
        Commands::Add { sources } => add_torrents(&engine, sources).await,
        Commands::List => print_json(&engine.torrents()),
        Commands::Show { hash } => {
            let torrent = lookup(&engine, &hash)?;
            print_json(&torrent.view())
        }
        Commands::Remove { hash } => {
            let torrent = lookup(&engine, &hash)?;
            engine.remove(&torrent).map_err(CloudseedError::from)?;
            println!("Removed {hash}");
            Ok(())
        }
    }
}

/// Configures an engine, restoring previously added torrents.
async fn open_engine(config: EngineConfig) -> anyhow::Result<Engine> {
    let engine = Engine::new(Arc::new(SimulatedClientFactory::new()));

    match engine.configure(config).await {
        Ok(()) => {}
        // The client is up; only part of the cache was restored
        Err(e @ EngineError::CacheScan { .. }) => {
            eprintln!("Warning: {}", CloudseedError::from(e).user_message());
        }
        Err(e) => return Err(CloudseedError::from(e).into()),
    }
    Ok(engine)
}

async fn add_torrents(engine: &Engine, sources: Vec<String>) -> anyhow::Result<()> {
    for source in &sources {
        if source.starts_with("magnet:") {
            engine
                .new_by_magnet(source)
                .await
                .map_err(CloudseedError::from)?;
        } else {
            let file = tokio::fs::File::open(source)
                .await
                .with_context(|| format!("Failed to open {source}"))?;
            engine
                .new_by_file(file)
                .await
                .map_err(CloudseedError::from)?;
        }
        tracing::info!("Added {source}");
    }

    engine.reconcile();
    print_json(&engine.torrents())
}

fn lookup(engine: &Engine, hash: &str) -> anyhow::Result<Arc<cloudseed_core::Torrent>> {
    NetworkHash::from_hex(hash).map_err(|e| CloudseedError::from(EngineError::from(e)))?;
    engine.get(hash).ok_or_else(|| {
        CloudseedError::from(EngineError::NotFound {
            info_hash: hash.to_string(),
        })
        .into()
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> EngineArgs {
        EngineArgs {
            download_dir: Some(PathBuf::from("/srv/media")),
            port: Some(-1),
            no_upload: true,
            no_seed: false,
            no_encryption: true,
        }
    }

    #[test]
    fn test_args_override_config() {
        let config = args().into_config();

        assert_eq!(config.download_directory, PathBuf::from("/srv/media"));
        assert_eq!(config.incoming_port, -1);
        assert!(!config.enable_upload);
        assert!(!config.enable_encryption);
    }

    #[test]
    fn test_lookup_classifies_bad_hashes() {
        let engine = Engine::new(Arc::new(SimulatedClientFactory::unbound()));

        let err = lookup(&engine, "xyz").err().unwrap();
        let err = err.downcast_ref::<CloudseedError>().unwrap();
        assert!(matches!(err, CloudseedError::Engine(EngineError::InvalidHash(_))));

        let err = lookup(&engine, &"00".repeat(20)).err().unwrap();
        let err = err.downcast_ref::<CloudseedError>().unwrap();
        assert!(err.is_user_error());
        assert!(err.user_message().contains("not found"));
    }
}
