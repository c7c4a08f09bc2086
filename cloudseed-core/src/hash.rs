//! Torrent identities: content hashes and network hashes.
//!
//! A torrent has two identities. The content hash is derived purely from the
//! data layout (the info dictionary) and is known as soon as the network
//! client asks for storage. The network hash is the swarm identity the
//! client assigns, which may also cover non-content metadata such as
//! trackers.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::metainfo::InfoDict;
use crate::metainfo::encode::encode_info;

/// Length in bytes of both identity digests.
pub const HASH_LEN: usize = 20;

/// Errors from decoding a textual network hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("Invalid hex string")]
    InvalidHex,

    #[error("Invalid hash length: {len} bytes (expected 20)")]
    InvalidLength { len: usize },
}

/// SHA-1 of the canonical encoding of a torrent's info dictionary.
///
/// Two descriptors with identical data layout but different trackers share
/// a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    pub fn new(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Swarm-visible torrent identity assigned by the network client.
///
/// Displayed as 40 lowercase hex characters, which is also the key of the
/// public registry view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkHash([u8; HASH_LEN]);

impl NetworkHash {
    /// Creates NetworkHash from a 20-byte digest.
    pub fn new(hash: [u8; HASH_LEN]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Decodes a hex string that must yield exactly 20 bytes.
    ///
    /// # Errors
    /// - `HashError::InvalidHex` - Input is not valid hexadecimal
    /// - `HashError::InvalidLength` - Input decodes to anything but 20 bytes
    pub fn from_hex(input: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(input).map_err(|_| HashError::InvalidHex)?;
        let hash: [u8; HASH_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HashError::InvalidLength { len: bytes.len() })?;
        Ok(Self(hash))
    }

    /// Lowercase hex form used as the display identity.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NetworkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Computes the content identity of an info dictionary.
///
/// Deterministic and free of side effects: byte-identical metadata always
/// yields the same hash, whichever thread asks.
pub fn compute_content_hash(info: &InfoDict) -> ContentHash {
    ContentHash(sha1_digest(&encode_info(info)))
}

pub(crate) fn sha1_digest(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&hasher.finalize());
    hash
}
