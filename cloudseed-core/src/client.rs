//! Network client capability consumed by the engine.
//!
//! The engine never speaks the BitTorrent protocol itself. It drives an
//! opaque client through these traits, and the client calls back into the
//! engine through [`StorageOpener`] whenever it needs data access for a
//! torrent it only knows by metadata.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::hash::NetworkHash;
use crate::metainfo::{InfoDict, Metainfo, MetainfoError};

/// Errors reported by a network client implementation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to bind listen address {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Client startup failed: {reason}")]
    Startup { reason: String },

    #[error("Client has been closed")]
    Closed,

    #[error("Failed to add torrent: {reason}")]
    AddFailed { reason: String },

    #[error(transparent)]
    Metainfo(#[from] MetainfoError),

    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Everything a client needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub data_dir: PathBuf,
    pub config_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub no_upload: bool,
    pub seed: bool,
    pub disable_encryption: bool,
}

/// Piece-addressed data access for one torrent.
///
/// Offsets are relative to the start of `piece`; implementations map them
/// onto the torrent's files.
pub trait TorrentStorage: Send + Sync {
    /// Reads into `buf`, returning the number of bytes read. Short reads
    /// happen at the end of the torrent or of data written so far.
    fn read_at(&self, piece: u32, offset: u32, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `data`, returning its length.
    fn write_at(&self, piece: u32, offset: u32, data: &[u8]) -> io::Result<usize>;

    /// Releases open file handles. Later I/O fails.
    fn close(&self);
}

/// Callback the client uses to obtain storage for a torrent's content.
pub trait StorageOpener: Send + Sync {
    fn open(&self, info: &InfoDict) -> Arc<dyn TorrentStorage>;
}

/// Live transfer figures for one torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentStats {
    pub bytes_completed: u64,
    pub connected_peers: u32,
    /// Completed bytes per file, in the order of `InfoDict::files`.
    pub file_bytes_completed: Vec<u64>,
}

/// A torrent as the network client knows it.
pub trait TorrentHandle: Send + Sync {
    fn network_hash(&self) -> NetworkHash;

    /// The info dictionary, once known. Magnet torrents have none until the
    /// client fetched it from peers.
    fn info(&self) -> Option<InfoDict>;

    /// Best available name, e.g. a magnet display name before metadata.
    fn name(&self) -> Option<String>;

    fn stats(&self) -> TorrentStats;

    /// Removes the torrent from the client and releases its network-side
    /// resources.
    fn drop_torrent(&self);
}

/// A running BitTorrent client.
#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TorrentHandle>, ClientError>;

    async fn add_metainfo(&self, metainfo: Metainfo)
    -> Result<Arc<dyn TorrentHandle>, ClientError>;

    fn torrents(&self) -> Vec<Arc<dyn TorrentHandle>>;

    /// Stops the client and releases its listening port.
    fn close(&self);
}

/// Builds network clients; the engine calls it on every reconfiguration.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        settings: ClientSettings,
        opener: Arc<dyn StorageOpener>,
    ) -> Result<Arc<dyn NetworkClient>, ClientError>;
}
