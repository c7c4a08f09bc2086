//! Applying configuration: client teardown, rebuild and cache replay.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};

use super::hook::EngineOpener;
use super::{Engine, EngineError, EngineStatus, Shared};
use crate::client::ClientSettings;
use crate::config::{ConfigSnapshot, DESCRIPTOR_EXTENSION, EngineConfig, EngineTuning};

/// Marks a reconfiguration as underway for as long as it lives.
///
/// Dropping it settles the engine status, whichever way the
/// reconfiguration ended.
struct ConfiguringGuard<'a> {
    shared: &'a Shared,
    settle: EngineStatus,
}

impl<'a> ConfiguringGuard<'a> {
    fn enter(shared: &'a Shared) -> Result<Self, EngineError> {
        let mut state = shared.state.lock();
        if state.status == EngineStatus::Configuring {
            return Err(EngineError::ConfigInProgress);
        }
        let settle = state.status;
        state.status = EngineStatus::Configuring;
        Ok(Self { shared, settle })
    }

    fn settle_as(&mut self, status: EngineStatus) {
        self.settle = status;
    }
}

impl Drop for ConfiguringGuard<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().status = self.settle;
    }
}

impl Engine {
    /// Applies `config`, rebuilding the network client.
    ///
    /// The previous client is closed first and the engine waits, bounded by
    /// [`EngineTuning::port_release_timeout`], for its port to be released.
    /// Descriptors cached by the client are re-ingested afterwards. A
    /// reconciliation pass runs at the end whether or not configuration
    /// succeeded.
    ///
    /// # Errors
    /// - `EngineError::ConfigInProgress` - Another reconfiguration is underway
    /// - `EngineError::InvalidPath` - The download directory cannot be resolved
    /// - `EngineError::ClientInit` - The new client failed to start
    /// - `EngineError::CacheScan` - A cached descriptor could not be replayed
    pub async fn configure(&self, config: EngineConfig) -> Result<(), EngineError> {
        let result = self.apply_configuration(config).await;
        if let Err(e) = &result {
            tracing::warn!("Configuration failed: {e}");
        }
        self.reconcile();
        result
    }

    async fn apply_configuration(&self, config: EngineConfig) -> Result<(), EngineError> {
        let mut guard = ConfiguringGuard::enter(&self.shared)?;

        let download_directory =
            std::path::absolute(&config.download_directory).map_err(|source| {
                EngineError::InvalidPath {
                    path: config.download_directory.clone(),
                    source,
                }
            })?;
        let snapshot = ConfigSnapshot::resolve(&config, &download_directory);

        let previous = {
            let mut state = self.shared.state.lock();
            state.client.take().map(|client| {
                let port = state.snapshot.as_ref().map(|s| s.incoming_port);
                (client, port)
            })
        };
        if let Some((client, port)) = previous {
            guard.settle_as(EngineStatus::Disconnected);
            tracing::info!("Closing network client");
            client.close();
            if let Some(port) = port
                && !wait_for_port_release(port, &self.shared.tuning).await
            {
                tracing::warn!(
                    "Port {port} still accepting connections after {:?}, continuing",
                    self.shared.tuning.port_release_timeout
                );
            }
        }

        let settings = ClientSettings {
            data_dir: snapshot.download_directory.clone(),
            config_dir: snapshot.config_directory.clone(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], snapshot.incoming_port)),
            no_upload: !snapshot.enable_upload,
            seed: snapshot.enable_seeding,
            disable_encryption: !snapshot.enable_encryption,
        };
        let opener = Arc::new(EngineOpener::new(
            &self.shared,
            snapshot.download_directory.clone(),
        ));
        let client = self
            .shared
            .factory
            .create(settings, opener)
            .await
            .map_err(EngineError::ClientInit)?;

        {
            let mut state = self.shared.state.lock();
            state.client = Some(client);
            state.generation += 1;
            state.snapshot = Some(snapshot.clone());
        }
        guard.settle_as(EngineStatus::Ready);
        tracing::info!(
            "Network client listening on port {} with data in {}",
            snapshot.incoming_port,
            snapshot.download_directory.display()
        );

        let replayed = self.replay_cache(&snapshot.cache_directory).await?;
        if replayed > 0 {
            tracing::info!("Reseeded {replayed} cached torrents");
        }
        Ok(())
    }

    /// Re-ingests every cached descriptor, stopping at the first failure.
    async fn replay_cache(&self, cache_dir: &Path) -> Result<usize, EngineError> {
        let scan_error = |path: &Path, source: Box<dyn std::error::Error + Send + Sync>| {
            EngineError::CacheScan {
                path: path.to_path_buf(),
                source,
            }
        };

        let mut entries = match tokio::fs::read_dir(cache_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(scan_error(cache_dir, e.into())),
        };

        let mut descriptors = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| scan_error(cache_dir, e.into()))?
        {
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext == DESCRIPTOR_EXTENSION)
            {
                descriptors.push(path);
            }
        }
        descriptors.sort();

        for path in &descriptors {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| scan_error(path, e.into()))?;
            self.new_by_file(file)
                .await
                .map_err(|e| scan_error(path, e.into()))?;
        }
        Ok(descriptors.len())
    }
}

/// Probes `port` on loopback until connections stop succeeding.
///
/// Backs off exponentially between probes. Returns false if the port still
/// accepted connections when the timeout ran out.
async fn wait_for_port_release(port: u16, tuning: &EngineTuning) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let deadline = Instant::now() + tuning.port_release_timeout;
    let mut interval = tuning.port_probe_interval;

    loop {
        match timeout(tuning.port_probe_connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {}
            _ => return true,
        }
        if Instant::now() + interval > deadline {
            return false;
        }
        sleep(interval).await;
        interval = (interval * 2).min(tuning.port_probe_max_interval);
    }
}
