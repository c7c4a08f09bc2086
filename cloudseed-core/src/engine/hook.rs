//! Storage-access hook handed to the network client.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use super::Shared;
use crate::client::{StorageOpener, TorrentStorage};
use crate::hash::compute_content_hash;
use crate::metainfo::InfoDict;
use crate::record::{StorageRef, Torrent};

/// Stages one record per distinct content and returns it as storage.
///
/// Holds the engine weakly so a client outliving its engine does not keep
/// the registry alive.
pub(super) struct EngineOpener {
    shared: Weak<Shared>,
    data_dir: PathBuf,
}

impl EngineOpener {
    pub(super) fn new(shared: &Arc<Shared>, data_dir: PathBuf) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            data_dir,
        }
    }
}

impl StorageOpener for EngineOpener {
    fn open(&self, info: &InfoDict) -> Arc<dyn TorrentStorage> {
        let content = compute_content_hash(info);

        let Some(shared) = self.shared.upgrade() else {
            tracing::warn!("Storage requested for {} after engine shutdown", info.name);
            return Torrent::from_info(&self.data_dir, info);
        };

        let torrent = shared
            .state
            .lock()
            .registry
            .stage_or_get(content, || {
                tracing::debug!("Staging {} under content hash {content}", info.name);
                Torrent::from_info(&self.data_dir, info)
            });

        Arc::new(StorageRef::new(&torrent))
    }
}
