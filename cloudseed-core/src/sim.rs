//! Simulated network client.
//!
//! An in-process [`NetworkClient`] that behaves like a real one towards the
//! engine: it binds its listen port, asks the storage hook for storage when
//! a descriptor is added, and caches added descriptors in its config
//! directory. It never talks to peers; transfer progress is driven by hand
//! through [`SimulatedTorrent`].
//!
//! Network hashes are the SHA-1 of the whole canonical descriptor, trackers
//! included, so two descriptors for the same content but with different
//! trackers land in different swarms.

use std::io;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::client::{
    ClientError, ClientFactory, ClientSettings, NetworkClient, StorageOpener, TorrentHandle,
    TorrentStats, TorrentStorage,
};
use crate::config::{CACHE_DIR_NAME, DESCRIPTOR_EXTENSION};
use crate::hash::{NetworkHash, sha1_digest};
use crate::metainfo::encode::encode_metainfo;
use crate::metainfo::{InfoDict, Metainfo, parse_magnet_link};

type TorrentList = Mutex<Vec<Arc<SimulatedTorrent>>>;

/// Holds a client creation until released, so tests can overlap calls.
#[derive(Default)]
pub struct CreationGate {
    entered: Notify,
    release: Notify,
}

impl CreationGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Resolves once a creation is parked at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Builds [`SimulatedClient`]s and keeps every client it built.
pub struct SimulatedClientFactory {
    bind_listener: bool,
    gate: Mutex<Option<Arc<CreationGate>>>,
    failure: Mutex<Option<String>>,
    clients: Mutex<Vec<Arc<SimulatedClient>>>,
}

impl Default for SimulatedClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedClientFactory {
    pub fn new() -> Self {
        Self {
            bind_listener: true,
            gate: Mutex::new(None),
            failure: Mutex::new(None),
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Factory whose clients do not bind their listen address.
    pub fn unbound() -> Self {
        Self {
            bind_listener: false,
            ..Self::new()
        }
    }

    /// Parks the next creation at `gate` until it is released.
    pub fn with_gate(gate: Arc<CreationGate>) -> Self {
        Self {
            gate: Mutex::new(Some(gate)),
            ..Self::new()
        }
    }

    /// Makes the next creation fail with `reason`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    pub fn clients(&self) -> Vec<Arc<SimulatedClient>> {
        self.clients.lock().clone()
    }

    /// Most recently built client.
    pub fn current(&self) -> Option<Arc<SimulatedClient>> {
        self.clients.lock().last().cloned()
    }
}

#[async_trait]
impl ClientFactory for SimulatedClientFactory {
    async fn create(
        &self,
        settings: ClientSettings,
        opener: Arc<dyn StorageOpener>,
    ) -> Result<Arc<dyn NetworkClient>, ClientError> {
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let failure = self.failure.lock().take();
        if let Some(reason) = failure {
            return Err(ClientError::Startup { reason });
        }

        let client = Arc::new(SimulatedClient::start(settings, opener, self.bind_listener).await?);
        self.clients.lock().push(Arc::clone(&client));
        Ok(client)
    }
}

/// In-process stand-in for a BitTorrent client.
pub struct SimulatedClient {
    settings: ClientSettings,
    opener: Arc<dyn StorageOpener>,
    listener: Mutex<Option<TcpListener>>,
    torrents: Arc<TorrentList>,
    closed: AtomicBool,
}

impl SimulatedClient {
    async fn start(
        settings: ClientSettings,
        opener: Arc<dyn StorageOpener>,
        bind_listener: bool,
    ) -> Result<Self, ClientError> {
        let listener = if bind_listener {
            let listener =
                TcpListener::bind(settings.listen_addr).map_err(|source| ClientError::Bind {
                    addr: settings.listen_addr,
                    source,
                })?;
            Some(listener)
        } else {
            None
        };
        tokio::fs::create_dir_all(settings.config_dir.join(CACHE_DIR_NAME)).await?;

        tracing::debug!("Simulated client started on {}", settings.listen_addr);
        Ok(Self {
            settings,
            opener,
            listener: Mutex::new(listener),
            torrents: Arc::new(Mutex::new(Vec::new())),
            closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn torrent(&self, hash: &NetworkHash) -> Option<Arc<SimulatedTorrent>> {
        self.torrents
            .lock()
            .iter()
            .find(|torrent| torrent.hash == *hash)
            .cloned()
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    fn cache_path(&self, hash: &NetworkHash) -> PathBuf {
        self.settings
            .config_dir
            .join(CACHE_DIR_NAME)
            .join(format!("{hash}.{DESCRIPTOR_EXTENSION}"))
    }

    /// Registers `torrent` unless another add of the same hash won the race.
    fn insert(&self, torrent: SimulatedTorrent) -> Arc<SimulatedTorrent> {
        let mut torrents = self.torrents.lock();
        if let Some(existing) = torrents.iter().find(|t| t.hash == torrent.hash) {
            return Arc::clone(existing);
        }
        let torrent = Arc::new(torrent);
        torrents.push(Arc::clone(&torrent));
        torrent
    }
}

#[async_trait]
impl NetworkClient for SimulatedClient {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn TorrentHandle>, ClientError> {
        self.ensure_open()?;
        let magnet = parse_magnet_link(uri)?;
        if let Some(existing) = self.torrent(&magnet.info_hash) {
            return Ok(existing);
        }

        let torrent = SimulatedTorrent::new(
            magnet.info_hash,
            magnet.display_name,
            None,
            None,
            Arc::downgrade(&self.torrents),
            None,
        );
        Ok(self.insert(torrent))
    }

    async fn add_metainfo(
        &self,
        metainfo: Metainfo,
    ) -> Result<Arc<dyn TorrentHandle>, ClientError> {
        self.ensure_open()?;
        let descriptor = encode_metainfo(&metainfo);
        let hash = NetworkHash::new(sha1_digest(&descriptor));
        if let Some(existing) = self.torrent(&hash) {
            return Ok(existing);
        }

        let storage = self.opener.open(&metainfo.info);

        let cache_path = self.cache_path(&hash);
        if !tokio::fs::try_exists(&cache_path).await? {
            tokio::fs::write(&cache_path, &descriptor).await?;
        }

        let torrent = SimulatedTorrent::new(
            hash,
            Some(metainfo.info.name.clone()),
            Some(metainfo.info),
            Some(storage),
            Arc::downgrade(&self.torrents),
            Some(cache_path),
        );
        Ok(self.insert(torrent))
    }

    fn torrents(&self) -> Vec<Arc<dyn TorrentHandle>> {
        self.torrents
            .lock()
            .iter()
            .map(|torrent| Arc::clone(torrent) as Arc<dyn TorrentHandle>)
            .collect()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.listener.lock().take();
        self.torrents.lock().clear();
        tracing::debug!("Simulated client on {} closed", self.settings.listen_addr);
    }
}

/// A torrent inside a [`SimulatedClient`].
pub struct SimulatedTorrent {
    hash: NetworkHash,
    name: Option<String>,
    info: Option<InfoDict>,
    storage: Option<Arc<dyn TorrentStorage>>,
    completed: AtomicU64,
    peers: AtomicU32,
    owner: Weak<TorrentList>,
    cache_path: Option<PathBuf>,
}

impl SimulatedTorrent {
    fn new(
        hash: NetworkHash,
        name: Option<String>,
        info: Option<InfoDict>,
        storage: Option<Arc<dyn TorrentStorage>>,
        owner: Weak<TorrentList>,
        cache_path: Option<PathBuf>,
    ) -> Self {
        Self {
            hash,
            name,
            info,
            storage,
            completed: AtomicU64::new(0),
            peers: AtomicU32::new(0),
            owner,
            cache_path,
        }
    }

    /// Writes a whole piece through the storage the hook provided and
    /// counts it as downloaded.
    ///
    /// # Errors
    /// - `io::ErrorKind::Unsupported` - The torrent has no metadata yet
    /// - Any error the storage returns
    pub fn receive_piece(&self, piece: u32, data: &[u8]) -> io::Result<()> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "no storage before metadata")
        })?;
        storage.write_at(piece, 0, data)?;
        self.completed
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Reads through the storage the hook provided.
    pub fn read_piece(&self, piece: u32, offset: u32, buf: &mut [u8]) -> io::Result<usize> {
        let storage = self.storage.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Unsupported, "no storage before metadata")
        })?;
        storage.read_at(piece, offset, buf)
    }

    pub fn set_peers(&self, peers: u32) {
        self.peers.store(peers, Ordering::Relaxed);
    }
}

impl TorrentHandle for SimulatedTorrent {
    fn network_hash(&self) -> NetworkHash {
        self.hash
    }

    fn info(&self) -> Option<InfoDict> {
        self.info.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn stats(&self) -> TorrentStats {
        let bytes_completed = self.completed.load(Ordering::Relaxed);

        // Pieces arrive in order, so completion fills files front to back
        let mut remaining = bytes_completed;
        let file_bytes_completed = self
            .info
            .as_ref()
            .map(|info| {
                info.files()
                    .iter()
                    .map(|file| {
                        let done = remaining.min(file.length);
                        remaining -= done;
                        done
                    })
                    .collect()
            })
            .unwrap_or_default();

        TorrentStats {
            bytes_completed,
            connected_peers: self.peers.load(Ordering::Relaxed),
            file_bytes_completed,
        }
    }

    fn drop_torrent(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.lock().retain(|torrent| torrent.hash != self.hash);
        }
        if let Some(storage) = &self.storage {
            storage.close();
        }
        if let Some(path) = &self.cache_path
            && let Err(e) = std::fs::remove_file(path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove cached descriptor {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::metainfo::FileLayout;
    use crate::record::Torrent;

    struct DetachedOpener {
        data_dir: PathBuf,
    }

    impl StorageOpener for DetachedOpener {
        fn open(&self, info: &InfoDict) -> Arc<dyn TorrentStorage> {
            Torrent::from_info(&self.data_dir, info)
        }
    }

    fn metainfo(trackers: &[&str]) -> Metainfo {
        Metainfo {
            info: InfoDict {
                name: "clip.mp4".to_string(),
                piece_length: 4,
                piece_hashes: vec![[0u8; 20]; 2],
                layout: FileLayout::Single { length: 8 },
            },
            announce_urls: trackers.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn settings(dir: &std::path::Path) -> ClientSettings {
        ClientSettings {
            data_dir: dir.to_path_buf(),
            config_dir: dir.join(".config"),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            no_upload: false,
            seed: true,
            disable_encryption: false,
        }
    }

    async fn client(dir: &std::path::Path) -> Arc<dyn NetworkClient> {
        let factory = SimulatedClientFactory::new();
        let opener = Arc::new(DetachedOpener {
            data_dir: dir.to_path_buf(),
        });
        factory.create(settings(dir), opener).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_metainfo_caches_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;

        let handle = client.add_metainfo(metainfo(&["http://a/"])).await.unwrap();

        let cached = dir
            .path()
            .join(".config/torrents")
            .join(format!("{}.torrent", handle.network_hash()));
        let bytes = std::fs::read(cached).unwrap();
        assert_eq!(bytes, encode_metainfo(&metainfo(&["http://a/"])));
    }

    #[tokio::test]
    async fn test_trackers_change_network_hash() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;

        let first = client.add_metainfo(metainfo(&["http://a/"])).await.unwrap();
        let again = client.add_metainfo(metainfo(&["http://a/"])).await.unwrap();
        let other = client.add_metainfo(metainfo(&["http://b/"])).await.unwrap();

        assert_eq!(first.network_hash(), again.network_hash());
        assert_ne!(first.network_hash(), other.network_hash());
        assert_eq!(client.torrents().len(), 2);
    }

    #[tokio::test]
    async fn test_magnet_has_no_info() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;

        let handle = client
            .add_magnet("magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=clip")
            .await
            .unwrap();

        assert!(handle.info().is_none());
        assert_eq!(
            handle.network_hash().to_hex(),
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(handle.stats(), TorrentStats::default());
    }

    #[tokio::test]
    async fn test_drop_torrent_forgets_and_uncaches() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;
        let handle = client.add_metainfo(metainfo(&[])).await.unwrap();

        handle.drop_torrent();

        assert!(client.torrents().is_empty());
        let cache_dir = dir.path().join(".config/torrents");
        assert_eq!(std::fs::read_dir(cache_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_closed_client_rejects_adds() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path()).await;
        client.close();

        let err = client.add_metainfo(metainfo(&[])).await.err().unwrap();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut settings = settings(dir.path());
        settings.listen_addr = taken.local_addr().unwrap();

        let factory = SimulatedClientFactory::new();
        let opener = Arc::new(DetachedOpener {
            data_dir: dir.path().to_path_buf(),
        });
        let err = factory.create(settings, opener).await.err().unwrap();
        assert!(matches!(err, ClientError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_stats_fill_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let factory = SimulatedClientFactory::new();
        let opener = Arc::new(DetachedOpener {
            data_dir: dir.path().to_path_buf(),
        });
        factory.create(settings(dir.path()), opener).await.unwrap();
        let client = factory.current().unwrap();

        let handle = client.add_metainfo(metainfo(&[])).await.unwrap();
        let torrent = client.torrent(&handle.network_hash()).unwrap();
        torrent.receive_piece(0, b"abcd").unwrap();
        torrent.set_peers(2);

        let stats = handle.stats();
        assert_eq!(stats.bytes_completed, 4);
        assert_eq!(stats.connected_peers, 2);
        assert_eq!(stats.file_bytes_completed, vec![4]);

        let mut buf = [0u8; 4];
        assert_eq!(torrent.read_piece(0, 0, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
    }
}
