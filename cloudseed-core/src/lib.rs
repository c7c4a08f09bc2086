//! Cloudseed Core - torrent registry for a torrent-serving process
//!
//! Keeps one record per torrent known to an embedded BitTorrent client,
//! reconciling the content identity seen by the storage hook with the
//! network identity the client assigns. Also provides descriptor and magnet
//! parsing, configuration, and a simulated client for tests and tooling.

pub mod client;
pub mod config;
pub mod engine;
pub mod hash;
pub mod metainfo;
pub mod record;
pub mod sim;
pub mod tracing_setup;

pub use client::{ClientError, ClientFactory, NetworkClient};
pub use config::{ConfigSnapshot, EngineConfig, EngineTuning};
pub use engine::{Engine, EngineError, EngineStatus};
pub use hash::{ContentHash, HashError, NetworkHash};
pub use metainfo::{Metainfo, MetainfoError};
pub use record::{Torrent, TorrentView};

/// Errors that can bubble up from any Cloudseed subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CloudseedError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudseedError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            CloudseedError::Engine(e) => match e {
                EngineError::ConfigInProgress => {
                    "Another configuration change is in progress".to_string()
                }
                EngineError::InvalidPath { path, .. } => {
                    format!("Invalid download directory: {}", path.display())
                }
                EngineError::ClientInit(_) => "Could not start the torrent client".to_string(),
                EngineError::CacheScan { path, .. } => {
                    format!("Could not restore cached torrent {}", path.display())
                }
                EngineError::InvalidHash(_) => "Invalid info hash".to_string(),
                EngineError::NotFound { info_hash } => format!("Torrent {info_hash} not found"),
                EngineError::NotConfigured => "The torrent client is not running".to_string(),
                EngineError::Metainfo(e) => metainfo_message(e),
                EngineError::Client(_) => "Torrent client error occurred".to_string(),
            },
            CloudseedError::Metainfo(e) => metainfo_message(e),
            CloudseedError::Client(_) => "Torrent client error occurred".to_string(),
            CloudseedError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CloudseedError::Engine(
                EngineError::InvalidPath { .. }
                    | EngineError::InvalidHash(_)
                    | EngineError::NotFound { .. }
                    | EngineError::Metainfo(_)
                    | EngineError::Client(ClientError::Metainfo(_))
            ) | CloudseedError::Metainfo(_)
        )
    }
}

fn metainfo_message(error: &MetainfoError) -> String {
    match error {
        MetainfoError::InvalidTorrentFile { reason } => format!("Invalid torrent file: {reason}"),
        MetainfoError::InvalidMagnet { reason } => format!("Invalid magnet link: {reason}"),
        MetainfoError::Io(_) => "Could not read torrent file".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, CloudseedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_are_classified() {
        let not_found: CloudseedError = EngineError::NotFound {
            info_hash: "ab".repeat(20),
        }
        .into();
        assert!(not_found.is_user_error());
        assert_eq!(
            not_found.user_message(),
            format!("Torrent {} not found", "ab".repeat(20))
        );

        let bad_file: CloudseedError = MetainfoError::InvalidTorrentFile {
            reason: "truncated".to_string(),
        }
        .into();
        assert!(bad_file.is_user_error());
        assert_eq!(bad_file.user_message(), "Invalid torrent file: truncated");

        let busy: CloudseedError = EngineError::ConfigInProgress.into();
        assert!(!busy.is_user_error());
    }
}
