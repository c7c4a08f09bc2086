//! Reconciliation of the registry against the network client.

use std::sync::Arc;

use super::Engine;
use crate::hash::compute_content_hash;
use crate::record::Torrent;

impl Engine {
    /// Promotes staged records and refreshes every record from the client.
    ///
    /// For each torrent the client knows: if the record registered under
    /// its network hash already backs that torrent's storage in the
    /// current client, it is kept. Otherwise a staged record with the same
    /// content is promoted under the hash, replacing any record left over
    /// from an earlier client, or failing that the registered record is
    /// reused or a fresh one registered. The record is then bound to the
    /// client handle and its live fields refreshed.
    ///
    /// Does nothing while no client is running. Torrents removed while the
    /// client was being listed are skipped, and the pass is abandoned if
    /// the client was replaced meanwhile.
    pub fn reconcile(&self) {
        let (client, data_dir, generation, removal_seq) = {
            let state = self.shared.state.lock();
            match (&state.client, &state.snapshot) {
                (Some(client), Some(snapshot)) => (
                    Arc::clone(client),
                    snapshot.download_directory.clone(),
                    state.generation,
                    state.registry.removal_seq(),
                ),
                _ => return,
            }
        };

        let observed: Vec<_> = client
            .torrents()
            .into_iter()
            .map(|handle| {
                let content = handle.info().map(|info| compute_content_hash(&info));
                (handle.network_hash(), content, handle)
            })
            .collect();

        let mut bound = Vec::with_capacity(observed.len());
        let mut replaced = Vec::new();
        {
            let mut state = self.shared.state.lock();
            if state.generation != generation || state.client.is_none() {
                tracing::debug!("Client replaced during reconcile, abandoning pass");
                return;
            }
            let registry = &mut state.registry;

            for (hash, content, handle) in observed {
                if registry.removed_since(&hash, removal_seq) {
                    tracing::debug!("Skipping torrent {hash} removed during reconcile");
                    continue;
                }
                let staged = if registry.backs_storage(&hash, generation) {
                    None
                } else {
                    content.and_then(|content| registry.take_staged(&content))
                };
                let torrent = match staged {
                    Some(torrent) => {
                        tracing::debug!("Promoting staged torrent {hash}");
                        replaced.extend(registry.promote(
                            hash,
                            Arc::clone(&torrent),
                            Some(generation),
                        ));
                        torrent
                    }
                    None => match registry.get(&hash) {
                        Some(torrent) => Arc::clone(torrent),
                        None => {
                            tracing::debug!("Registering discovered torrent {hash}");
                            let torrent = Torrent::discovered(&data_dir);
                            registry.promote(hash, Arc::clone(&torrent), None);
                            torrent
                        }
                    },
                };
                // Bound under the lock so a concurrent remove sees the handle
                torrent.bind(handle);
                bound.push(torrent);
            }
        }

        for previous in replaced {
            previous.stop();
        }
        for torrent in bound {
            torrent.refresh();
        }
    }
}
