//! Per-torrent records.
//!
//! A [`Torrent`] is the registry's view of one torrent and, through its
//! [`TorrentStorage`] implementation, the data-access target the network
//! client writes pieces into. Its files are sub-resources opened lazily and
//! released by [`Torrent::stop`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::client::{TorrentHandle, TorrentStorage};
use crate::hash::{ContentHash, NetworkHash, compute_content_hash};
use crate::metainfo::InfoDict;

enum FileSlot {
    Closed,
    Open(File),
    Stopped,
}

/// One file of a torrent, addressed by its byte range within the torrent.
pub struct TorrentFile {
    path: PathBuf,
    full_path: PathBuf,
    offset: u64,
    length: u64,
    completed: AtomicU64,
    slot: Mutex<FileSlot>,
}

impl TorrentFile {
    fn new(data_dir: &Path, components: &[String], offset: u64, length: u64) -> Self {
        let path: PathBuf = components.iter().collect();
        Self {
            full_path: data_dir.join(&path),
            path,
            offset,
            length,
            completed: AtomicU64::new(0),
            slot: Mutex::new(FileSlot::Closed),
        }
    }

    /// Path relative to the data directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn percent(&self) -> f32 {
        percent(self.completed(), self.length)
    }

    /// Closes the backing file. Any later read or write fails.
    pub fn stop(&self) {
        *self.slot.lock() = FileSlot::Stopped;
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.slot.lock(), FileSlot::Stopped)
    }

    fn read_at(&self, file_offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut slot = self.slot.lock();
        if let FileSlot::Closed = *slot {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.full_path)
            {
                Ok(file) => *slot = FileSlot::Open(file),
                // Nothing written yet
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        let file = open_file(&mut slot, &self.path)?;

        file.seek(SeekFrom::Start(file_offset))?;
        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(read)
    }

    fn write_at(&self, file_offset: u64, data: &[u8]) -> io::Result<()> {
        let mut slot = self.slot.lock();
        if let FileSlot::Closed = *slot {
            if let Some(parent) = self.full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.full_path)?;
            *slot = FileSlot::Open(file);
        }
        let file = open_file(&mut slot, &self.path)?;

        file.seek(SeekFrom::Start(file_offset))?;
        file.write_all(data)
    }
}

fn open_file<'a>(slot: &'a mut FileSlot, path: &Path) -> io::Result<&'a mut File> {
    match slot {
        FileSlot::Open(file) => Ok(file),
        FileSlot::Stopped => Err(io::Error::new(
            io::ErrorKind::NotConnected,
            format!("file {} has been stopped", path.display()),
        )),
        FileSlot::Closed => Err(io::Error::other("file not opened")),
    }
}

fn percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64 * 100.0) as f32
    }
}

struct TorrentState {
    id: Option<NetworkHash>,
    info_hash: String,
    content_hash: Option<ContentHash>,
    name: String,
    loaded: bool,
    piece_length: u64,
    size: u64,
    downloaded: u64,
    percent: f32,
    download_rate: f64,
    peers: u32,
    files: Vec<Arc<TorrentFile>>,
    handle: Option<Arc<dyn TorrentHandle>>,
    last_sample: Option<(Instant, u64)>,
}

impl TorrentState {
    fn empty() -> Self {
        Self {
            id: None,
            info_hash: String::new(),
            content_hash: None,
            name: String::new(),
            loaded: false,
            piece_length: 0,
            size: 0,
            downloaded: 0,
            percent: 0.0,
            download_rate: 0.0,
            peers: 0,
            files: Vec::new(),
            handle: None,
            last_sample: None,
        }
    }

    fn load(&mut self, data_dir: &Path, info: &InfoDict) {
        let mut offset = 0;
        self.files = info
            .files()
            .iter()
            .map(|entry| {
                let file = TorrentFile::new(data_dir, &entry.path, offset, entry.length);
                offset = offset.saturating_add(entry.length);
                Arc::new(file)
            })
            .collect();
        self.name = info.name.clone();
        self.piece_length = u64::from(info.piece_length);
        self.size = offset;
        self.content_hash = Some(compute_content_hash(info));
        self.loaded = true;
    }

    /// Files overlapping the torrent byte range `start..end`, with the
    /// offset into each file and the matching range of the caller's buffer.
    fn spans(&self, start: u64, end: u64) -> Vec<(Arc<TorrentFile>, u64, Range<usize>)> {
        self.files
            .iter()
            .filter(|file| file.length > 0)
            .filter_map(|file| {
                let from = start.max(file.offset);
                let to = end.min(file.offset.saturating_add(file.length));
                (from < to).then(|| {
                    let range = (from - start) as usize..(to - start) as usize;
                    (Arc::clone(file), from - file.offset, range)
                })
            })
            .collect()
    }
}

/// Registry record for a single torrent.
pub struct Torrent {
    data_dir: PathBuf,
    state: RwLock<TorrentState>,
}

impl Torrent {
    /// Record initialized from an info dictionary, as the storage hook does.
    pub(crate) fn from_info(data_dir: &Path, info: &InfoDict) -> Arc<Self> {
        let mut state = TorrentState::empty();
        state.load(data_dir, info);
        Arc::new(Self {
            data_dir: data_dir.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    /// Record for a torrent first seen during reconciliation.
    pub(crate) fn discovered(data_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            data_dir: data_dir.to_path_buf(),
            state: RwLock::new(TorrentState::empty()),
        })
    }

    pub(crate) fn assign_identity(&self, hash: NetworkHash) {
        let mut state = self.state.write();
        state.id = Some(hash);
        state.info_hash = hash.to_hex();
    }

    pub(crate) fn bind(&self, handle: Arc<dyn TorrentHandle>) {
        self.state.write().handle = Some(handle);
    }

    /// Copies live state from the bound client handle.
    ///
    /// Loads the file list first if the handle has learned the info
    /// dictionary since the last refresh.
    pub(crate) fn refresh(&self) {
        let (handle, loaded) = {
            let state = self.state.read();
            match &state.handle {
                Some(handle) => (Arc::clone(handle), state.loaded),
                None => return,
            }
        };
        let info = if loaded { None } else { handle.info() };
        let name = handle.name();
        let stats = handle.stats();
        let now = Instant::now();

        let mut state = self.state.write();
        if let Some(info) = info {
            state.load(&self.data_dir, &info);
        }
        if !state.loaded
            && let Some(name) = name
        {
            state.name = name;
        }

        state.download_rate = match state.last_sample {
            Some((at, bytes)) if now > at => {
                stats.bytes_completed.saturating_sub(bytes) as f64
                    / now.duration_since(at).as_secs_f64()
            }
            _ => 0.0,
        };
        state.last_sample = Some((now, stats.bytes_completed));
        state.downloaded = stats.bytes_completed;
        state.peers = stats.connected_peers;
        state.percent = percent(state.downloaded, state.size);

        for (file, done) in state.files.iter().zip(&stats.file_bytes_completed) {
            file.completed
                .store((*done).min(file.length), Ordering::Relaxed);
        }
    }

    /// Stops every file sub-resource.
    pub fn stop(&self) {
        for file in &self.state.read().files {
            file.stop();
        }
    }

    /// Internal identity: the network hash, once promoted.
    pub fn id(&self) -> Option<NetworkHash> {
        self.state.read().id
    }

    /// Display identity; empty until promoted.
    pub fn info_hash(&self) -> String {
        self.state.read().info_hash.clone()
    }

    pub fn content_hash(&self) -> Option<ContentHash> {
        self.state.read().content_hash
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().loaded
    }

    pub fn size(&self) -> u64 {
        self.state.read().size
    }

    pub fn downloaded(&self) -> u64 {
        self.state.read().downloaded
    }

    pub fn files(&self) -> Vec<Arc<TorrentFile>> {
        self.state.read().files.clone()
    }

    pub fn handle(&self) -> Option<Arc<dyn TorrentHandle>> {
        self.state.read().handle.clone()
    }

    /// Serializable snapshot for presentation.
    pub fn view(&self) -> TorrentView {
        let state = self.state.read();
        TorrentView {
            info_hash: state.info_hash.clone(),
            name: state.name.clone(),
            loaded: state.loaded,
            size: state.size,
            downloaded: state.downloaded,
            percent: state.percent,
            download_rate: state.download_rate,
            peers: state.peers,
            files: state
                .files
                .iter()
                .map(|file| FileView {
                    path: file.path.display().to_string(),
                    size: file.length,
                    completed: file.completed(),
                    percent: file.percent(),
                })
                .collect(),
        }
    }

    fn piece_start(&self, piece: u32, offset: u32) -> io::Result<(u64, u64)> {
        let state = self.state.read();
        if !state.loaded {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "torrent metadata not loaded",
            ));
        }
        Ok((
            u64::from(piece) * state.piece_length + u64::from(offset),
            state.size,
        ))
    }
}

impl TorrentStorage for Torrent {
    fn read_at(&self, piece: u32, offset: u32, buf: &mut [u8]) -> io::Result<usize> {
        let (start, size) = self.piece_start(piece, offset)?;
        if start >= size {
            return Ok(0);
        }
        let end = start.saturating_add(buf.len() as u64).min(size);
        let spans = self.state.read().spans(start, end);

        let mut total = 0;
        for (file, file_offset, range) in spans {
            let wanted = range.len();
            let read = file.read_at(file_offset, &mut buf[range])?;
            total += read;
            if read < wanted {
                break;
            }
        }
        Ok(total)
    }

    fn write_at(&self, piece: u32, offset: u32, data: &[u8]) -> io::Result<usize> {
        let (start, size) = self.piece_start(piece, offset)?;
        let end = start.saturating_add(data.len() as u64);
        if end > size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of {} bytes at {start} exceeds torrent size {size}", data.len()),
            ));
        }
        let spans = self.state.read().spans(start, end);

        for (file, file_offset, range) in spans {
            file.write_at(file_offset, &data[range])?;
        }
        Ok(data.len())
    }

    fn close(&self) {
        self.stop();
    }
}

/// Non-owning storage reference handed to the network client.
///
/// The registry owns the record; once it is removed and dropped, I/O
/// through this reference fails.
pub(crate) struct StorageRef(Weak<Torrent>);

impl StorageRef {
    pub(crate) fn new(torrent: &Arc<Torrent>) -> Self {
        Self(Arc::downgrade(torrent))
    }

    fn upgrade(&self) -> io::Result<Arc<Torrent>> {
        self.0.upgrade().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "torrent record released")
        })
    }
}

impl TorrentStorage for StorageRef {
    fn read_at(&self, piece: u32, offset: u32, buf: &mut [u8]) -> io::Result<usize> {
        self.upgrade()?.read_at(piece, offset, buf)
    }

    fn write_at(&self, piece: u32, offset: u32, data: &[u8]) -> io::Result<usize> {
        self.upgrade()?.write_at(piece, offset, data)
    }

    fn close(&self) {
        if let Some(torrent) = self.0.upgrade() {
            torrent.stop();
        }
    }
}

/// Presentation snapshot of a torrent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentView {
    pub info_hash: String,
    pub name: String,
    pub loaded: bool,
    pub size: u64,
    pub downloaded: u64,
    pub percent: f32,
    pub download_rate: f64,
    pub peers: u32,
    pub files: Vec<FileView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub path: String,
    pub size: u64,
    pub completed: u64,
    pub percent: f32,
}
