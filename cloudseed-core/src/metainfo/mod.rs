//! Torrent descriptor and magnet link handling.
//!
//! Descriptors are parsed with bencode-rs, magnet URIs with magnet-url.
//! The canonical encoder in [`encode`] feeds the content hasher and lets the
//! simulated client persist descriptors to its cache directory.

pub mod encode;
pub mod magnet;
pub mod parser;

pub use magnet::{MagnetLink, parse_magnet_link};
pub use parser::{parse_metainfo, read_metainfo};

/// Errors raised while decoding torrent descriptors or magnet links.
#[derive(Debug, thiserror::Error)]
pub enum MetainfoError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Invalid magnet link: {reason}")]
    InvalidMagnet { reason: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Complete torrent descriptor: data layout plus tracker metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    pub info: InfoDict,
    pub announce_urls: Vec<String>,
}

/// The info dictionary: everything that determines the torrent's data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoDict {
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub layout: FileLayout,
}

/// Single-file torrents carry a length, multi-file torrents a file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLayout {
    Single { length: u64 },
    Multi { files: Vec<FileEntry> },
}

/// Individual file within a multi-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Vec<String>,
    pub length: u64,
}

impl InfoDict {
    /// Files in on-disk order, relative to the data directory.
    ///
    /// Multi-file torrents nest their files under a directory named after
    /// the torrent.
    pub fn files(&self) -> Vec<FileEntry> {
        match &self.layout {
            FileLayout::Single { length } => vec![FileEntry {
                path: vec![self.name.clone()],
                length: *length,
            }],
            FileLayout::Multi { files } => files
                .iter()
                .map(|file| {
                    let mut path = Vec::with_capacity(file.path.len() + 1);
                    path.push(self.name.clone());
                    path.extend(file.path.iter().cloned());
                    FileEntry {
                        path,
                        length: file.length,
                    }
                })
                .collect(),
        }
    }

    pub fn total_length(&self) -> u64 {
        match &self.layout {
            FileLayout::Single { length } => *length,
            FileLayout::Multi { files } => files
                .iter()
                .fold(0, |total, file| total.saturating_add(file.length)),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }
}
