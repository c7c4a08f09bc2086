//! Staging map and primary registry.
//!
//! Records enter staging keyed by content hash and are promoted into the
//! primary registry, which keeps a binary-keyed and a hex-keyed view of the
//! same records. Nothing here locks; the engine holds its state mutex
//! around every call.
//!
//! Two bookkeeping maps ride along. `storage_generation` remembers which
//! client generation a promoted record is the storage target of, so a
//! later reconcile does not hand that record to a second swarm. `removed`
//! stamps every removal with a sequence number, so a reconcile that listed
//! the client before a removal does not resurrect the removed torrent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::hash::{ContentHash, NetworkHash};
use crate::record::{Torrent, TorrentView};

#[derive(Default)]
pub(crate) struct Registry {
    staging: HashMap<ContentHash, Arc<Torrent>>,
    by_hash: HashMap<NetworkHash, Arc<Torrent>>,
    by_hex: HashMap<String, Arc<Torrent>>,
    storage_generation: HashMap<NetworkHash, u64>,
    removed: HashMap<NetworkHash, u64>,
    removal_seq: u64,
}

impl Registry {
    /// Returns the staged record for `content`, staging a new one from
    /// `create` if there is none.
    pub(crate) fn stage_or_get(
        &mut self,
        content: ContentHash,
        create: impl FnOnce() -> Arc<Torrent>,
    ) -> Arc<Torrent> {
        Arc::clone(self.staging.entry(content).or_insert_with(create))
    }

    pub(crate) fn take_staged(&mut self, content: &ContentHash) -> Option<Arc<Torrent>> {
        self.staging.remove(content)
    }

    /// Assigns `torrent` its network identity and inserts it into both
    /// primary views. `storage_generation` is the client generation whose
    /// storage the record backs, if any. Returns the record previously
    /// registered under that hash, if it was a different one.
    pub(crate) fn promote(
        &mut self,
        hash: NetworkHash,
        torrent: Arc<Torrent>,
        storage_generation: Option<u64>,
    ) -> Option<Arc<Torrent>> {
        torrent.assign_identity(hash);
        match storage_generation {
            Some(generation) => self.storage_generation.insert(hash, generation),
            None => self.storage_generation.remove(&hash),
        };
        self.removed.remove(&hash);
        self.by_hex.insert(hash.to_hex(), Arc::clone(&torrent));
        self.by_hash
            .insert(hash, Arc::clone(&torrent))
            .filter(|previous| !Arc::ptr_eq(previous, &torrent))
    }

    /// Whether the record under `hash` is the storage target of a torrent
    /// in client generation `generation`.
    pub(crate) fn backs_storage(&self, hash: &NetworkHash, generation: u64) -> bool {
        self.storage_generation.get(hash) == Some(&generation)
    }

    pub(crate) fn get(&self, hash: &NetworkHash) -> Option<&Arc<Torrent>> {
        self.by_hash.get(hash)
    }

    pub(crate) fn remove(&mut self, hash: &NetworkHash) -> Option<Arc<Torrent>> {
        let torrent = self.by_hash.remove(hash)?;
        self.by_hex.remove(&hash.to_hex());
        self.storage_generation.remove(hash);
        self.removal_seq += 1;
        self.removed.insert(*hash, self.removal_seq);
        Some(torrent)
    }

    /// Sequence number of the latest removal.
    pub(crate) fn removal_seq(&self) -> u64 {
        self.removal_seq
    }

    /// Whether `hash` was removed after removal `seq`.
    pub(crate) fn removed_since(&self, hash: &NetworkHash, seq: u64) -> bool {
        self.removed.get(hash).is_some_and(|&removed| removed > seq)
    }

    pub(crate) fn staged_len(&self) -> usize {
        self.staging.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Hex-keyed snapshot of the primary registry.
    pub(crate) fn views(&self) -> BTreeMap<String, TorrentView> {
        self.by_hex
            .iter()
            .map(|(key, torrent)| (key.clone(), torrent.view()))
            .collect()
    }

    /// Checks that both primary views hold the same records under
    /// consistent keys and that no record is both staged and promoted.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        assert_eq!(self.by_hash.len(), self.by_hex.len());
        for (hash, torrent) in &self.by_hash {
            let by_hex = self
                .by_hex
                .get(&hash.to_hex())
                .expect("hex view misses a record");
            assert!(Arc::ptr_eq(torrent, by_hex));
            assert_eq!(torrent.info_hash(), hash.to_hex());
            assert!(
                !self
                    .staging
                    .values()
                    .any(|staged| Arc::ptr_eq(staged, torrent))
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::hash::compute_content_hash;
    use crate::metainfo::{FileLayout, InfoDict};

    fn info(name: &str) -> InfoDict {
        InfoDict {
            name: name.to_string(),
            piece_length: 16,
            piece_hashes: vec![[1u8; 20]],
            layout: FileLayout::Single { length: 16 },
        }
    }

    fn staged(registry: &mut Registry, name: &str) -> (ContentHash, Arc<Torrent>) {
        let info = info(name);
        let content = compute_content_hash(&info);
        let torrent =
            registry.stage_or_get(content, || Torrent::from_info(Path::new("/data"), &info));
        (content, torrent)
    }

    #[test]
    fn test_stage_deduplicates_by_content() {
        let mut registry = Registry::default();
        let (_, first) = staged(&mut registry, "a");
        let (_, second) = staged(&mut registry, "a");
        let (_, other) = staged(&mut registry, "b");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.staged_len(), 2);
    }

    #[test]
    fn test_promotion_moves_record_between_containers() {
        let mut registry = Registry::default();
        let (content, torrent) = staged(&mut registry, "a");
        let hash = NetworkHash::new([3u8; 20]);

        let taken = registry.take_staged(&content).unwrap();
        assert!(registry.promote(hash, taken, Some(1)).is_none());

        assert_eq!(registry.staged_len(), 0);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(registry.get(&hash).unwrap(), &torrent));
        assert_eq!(torrent.id(), Some(hash));
        assert!(registry.backs_storage(&hash, 1));
        assert!(!registry.backs_storage(&hash, 2));
        registry.assert_consistent();
    }

    #[test]
    fn test_discovered_promotion_clears_storage_generation() {
        let mut registry = Registry::default();
        let (content, _) = staged(&mut registry, "a");
        let hash = NetworkHash::new([6u8; 20]);

        let taken = registry.take_staged(&content).unwrap();
        registry.promote(hash, taken, Some(1));
        registry.promote(hash, Torrent::discovered(Path::new("/data")), None);

        assert!(!registry.backs_storage(&hash, 1));
    }

    #[test]
    fn test_removals_are_sequenced() {
        let mut registry = Registry::default();
        let hash = NetworkHash::new([7u8; 20]);
        registry.promote(hash, Torrent::discovered(Path::new("/data")), Some(1));
        let before = registry.removal_seq();

        registry.remove(&hash);

        assert!(registry.removed_since(&hash, before));
        assert!(!registry.removed_since(&hash, registry.removal_seq()));
        assert!(!registry.backs_storage(&hash, 1));

        registry.promote(hash, Torrent::discovered(Path::new("/data")), None);
        assert!(!registry.removed_since(&hash, before));
    }

    #[test]
    fn test_promotion_reports_replaced_record() {
        let mut registry = Registry::default();
        let hash = NetworkHash::new([4u8; 20]);
        let first = Torrent::discovered(Path::new("/data"));
        let second = Torrent::discovered(Path::new("/data"));

        registry.promote(hash, Arc::clone(&first), None);
        assert!(registry.promote(hash, Arc::clone(&first), None).is_none());
        let replaced = registry.promote(hash, Arc::clone(&second), None).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len(), 1);
        registry.assert_consistent();
    }

    #[test]
    fn test_remove_clears_both_views() {
        let mut registry = Registry::default();
        let hash = NetworkHash::new([5u8; 20]);
        registry.promote(hash, Torrent::discovered(Path::new("/data")), None);

        assert!(registry.remove(&hash).is_some());
        assert!(registry.remove(&hash).is_none());
        assert_eq!(registry.len(), 0);
        assert!(registry.views().is_empty());
        registry.assert_consistent();
    }

    #[test]
    fn test_views_are_hex_keyed() {
        let mut registry = Registry::default();
        let hash = NetworkHash::new([0xcd; 20]);
        registry.promote(hash, Torrent::discovered(Path::new("/data")), None);

        let views = registry.views();
        let view = views.get(&"cd".repeat(20)).unwrap();
        assert_eq!(view.info_hash, "cd".repeat(20));
    }
}
