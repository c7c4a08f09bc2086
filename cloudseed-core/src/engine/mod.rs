//! Torrent registry engine.
//!
//! One [`Engine`] owns the network client, the staging map, the primary
//! registry and the last applied configuration. All of it sits behind a
//! single mutex that is never held while calling into the client, because
//! the client calls back into the engine through the storage hook.

mod configure;
mod hook;
mod reconcile;
mod registry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncRead;

use crate::client::{ClientError, ClientFactory, NetworkClient};
use crate::config::{ConfigSnapshot, EngineTuning};
use crate::hash::{HashError, NetworkHash};
use crate::metainfo::{MetainfoError, read_metainfo};
use crate::record::{Torrent, TorrentView};
use registry::Registry;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration in progress")]
    ConfigInProgress,

    #[error("Invalid path: {path:?}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize network client")]
    ClientInit(#[source] ClientError),

    #[error("Failed to reseed cached torrents from {path:?}")]
    CacheScan {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid info hash")]
    InvalidHash(#[from] HashError),

    #[error("Torrent {info_hash} not found")]
    NotFound { info_hash: String },

    #[error("No network client is running")]
    NotConfigured,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),
}

/// Lifecycle of the engine's network client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No configuration applied yet
    Unconfigured,
    /// A reconfiguration is underway
    Configuring,
    /// A client is running
    Ready,
    /// The previous client was closed and no replacement could be started
    Disconnected,
}

struct EngineState {
    status: EngineStatus,
    registry: Registry,
    snapshot: Option<ConfigSnapshot>,
    client: Option<Arc<dyn NetworkClient>>,
    /// Bumped each time a new client is installed
    generation: u64,
}

struct Shared {
    state: Mutex<EngineState>,
    factory: Arc<dyn ClientFactory>,
    tuning: EngineTuning,
}

/// Registry and lifecycle manager for a torrent-serving process.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Creates an unconfigured engine that builds its clients with `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self::with_tuning(factory, EngineTuning::default())
    }

    pub fn with_tuning(factory: Arc<dyn ClientFactory>, tuning: EngineTuning) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    status: EngineStatus::Unconfigured,
                    registry: Registry::default(),
                    snapshot: None,
                    client: None,
                    generation: 0,
                }),
                factory,
                tuning,
            }),
        }
    }

    pub fn status(&self) -> EngineStatus {
        self.shared.state.lock().status
    }

    /// Settings of the last successful reconfiguration.
    pub fn snapshot(&self) -> Option<ConfigSnapshot> {
        self.shared.state.lock().snapshot.clone()
    }

    /// Looks up a promoted torrent by its hex network hash.
    ///
    /// Input that does not decode to exactly 20 bytes is reported as not
    /// found; use [`NetworkHash::from_hex`] to tell the two apart.
    pub fn get(&self, info_hash: &str) -> Option<Arc<Torrent>> {
        let hash = NetworkHash::from_hex(info_hash).ok()?;
        self.shared.state.lock().registry.get(&hash).cloned()
    }

    /// Removes a promoted torrent, stops its files and drops it from the
    /// network client.
    ///
    /// # Errors
    /// - `EngineError::NotFound` - The torrent is not in the primary registry
    pub fn remove(&self, torrent: &Torrent) -> Result<(), EngineError> {
        let not_found = || EngineError::NotFound {
            info_hash: torrent.info_hash(),
        };
        let id = torrent.id().ok_or_else(not_found)?;
        let removed = self
            .shared
            .state
            .lock()
            .registry
            .remove(&id)
            .ok_or_else(not_found)?;

        removed.stop();
        if let Some(handle) = removed.handle() {
            handle.drop_torrent();
        }
        tracing::info!("Removed torrent {id}");
        Ok(())
    }

    /// Adds a torrent by magnet URI through the network client.
    ///
    /// # Errors
    /// - `EngineError::NotConfigured` - No client is running
    /// - `EngineError::Client` - The client rejected the magnet
    pub async fn new_by_magnet(&self, uri: &str) -> Result<(), EngineError> {
        let client = self.client()?;
        let handle = client.add_magnet(uri).await?;
        tracing::info!("Added magnet {}", handle.network_hash());
        Ok(())
    }

    /// Parses a torrent descriptor from `reader` and adds it through the
    /// network client.
    ///
    /// # Errors
    /// - `EngineError::Metainfo` - Reading or parsing the descriptor failed
    /// - `EngineError::NotConfigured` - No client is running
    /// - `EngineError::Client` - The client rejected the torrent
    pub async fn new_by_file<R>(&self, reader: R) -> Result<(), EngineError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let metainfo = read_metainfo(reader).await?;
        let client = self.client()?;
        let name = metainfo.info.name.clone();
        let handle = client.add_metainfo(metainfo).await?;
        tracing::info!("Added torrent {name} as {}", handle.network_hash());
        Ok(())
    }

    /// Hex-keyed snapshot of every promoted torrent.
    pub fn torrents(&self) -> BTreeMap<String, TorrentView> {
        self.shared.state.lock().registry.views()
    }

    /// Number of promoted torrents.
    pub fn len(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records waiting for promotion.
    pub fn staged_count(&self) -> usize {
        self.shared.state.lock().registry.staged_len()
    }

    fn client(&self) -> Result<Arc<dyn NetworkClient>, EngineError> {
        self.shared
            .state
            .lock()
            .client
            .clone()
            .ok_or(EngineError::NotConfigured)
    }
}
