//! Engine configuration.
//!
//! [`EngineConfig`] is the caller-supplied input to `Engine::configure`,
//! [`ConfigSnapshot`] the resolved settings the engine last applied
//! successfully, and [`EngineTuning`] the engine's own timing knobs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port used when the requested one is outside (0, 65535).
pub const DEFAULT_INCOMING_PORT: u16 = 50007;

/// Sub-directory of the download directory handed to the client as its
/// config directory.
pub const CONFIG_DIR_NAME: &str = ".config";

/// Sub-directory of the config directory holding cached descriptors.
pub const CACHE_DIR_NAME: &str = "torrents";

/// Extension of cached torrent descriptors.
pub const DESCRIPTOR_EXTENSION: &str = "torrent";

/// Runtime settings applied by `Engine::configure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Where torrent data is stored. Relative paths resolve against the
    /// working directory.
    pub download_directory: PathBuf,
    /// Requested listen port; normalized before use.
    pub incoming_port: i32,
    pub enable_upload: bool,
    pub enable_seeding: bool,
    pub enable_encryption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_directory: PathBuf::from("downloads"),
            incoming_port: i32::from(DEFAULT_INCOMING_PORT),
            enable_upload: true,
            enable_seeding: true,
            enable_encryption: true,
        }
    }
}

impl EngineConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CLOUDSEED_DOWNLOAD_DIR") {
            config.download_directory = PathBuf::from(dir);
        }

        if let Ok(port) = std::env::var("CLOUDSEED_PORT")
            && let Ok(port) = port.parse::<i32>()
        {
            config.incoming_port = port;
        }

        if let Some(enabled) = env_flag("CLOUDSEED_ENABLE_UPLOAD") {
            config.enable_upload = enabled;
        }
        if let Some(enabled) = env_flag("CLOUDSEED_ENABLE_SEEDING") {
            config.enable_seeding = enabled;
        }
        if let Some(enabled) = env_flag("CLOUDSEED_ENABLE_ENCRYPTION") {
            config.enable_encryption = enabled;
        }

        config
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok()?.parse().ok()
}

/// Maps ports outside the open interval (0, 65535) to [`DEFAULT_INCOMING_PORT`].
pub fn normalize_port(port: i32) -> u16 {
    if port <= 0 || port >= 65535 {
        DEFAULT_INCOMING_PORT
    } else {
        port as u16
    }
}

/// Settings the engine last applied successfully.
///
/// Immutable once built; a successful reconfiguration replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    pub download_directory: PathBuf,
    pub incoming_port: u16,
    pub enable_upload: bool,
    pub enable_seeding: bool,
    pub enable_encryption: bool,
    pub config_directory: PathBuf,
    pub cache_directory: PathBuf,
}

impl ConfigSnapshot {
    /// Derives the snapshot for an already resolved download directory.
    pub fn resolve(config: &EngineConfig, download_directory: &Path) -> Self {
        let config_directory = download_directory.join(CONFIG_DIR_NAME);
        let cache_directory = config_directory.join(CACHE_DIR_NAME);
        Self {
            download_directory: download_directory.to_path_buf(),
            incoming_port: normalize_port(config.incoming_port),
            enable_upload: config.enable_upload,
            enable_seeding: config.enable_seeding,
            enable_encryption: config.enable_encryption,
            config_directory,
            cache_directory,
        }
    }
}

/// Timing of the best-effort wait for a closed client's port to be freed.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Overall bound on the wait
    pub port_release_timeout: Duration,
    /// First delay between connection probes
    pub port_probe_interval: Duration,
    /// Backoff ceiling
    pub port_probe_max_interval: Duration,
    /// Timeout of a single connection probe
    pub port_probe_connect_timeout: Duration,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            port_release_timeout: Duration::from_secs(5),
            port_probe_interval: Duration::from_millis(25),
            port_probe_max_interval: Duration::from_millis(500),
            port_probe_connect_timeout: Duration::from_millis(250),
        }
    }
}

impl EngineTuning {
    /// Short timings for tests.
    pub fn for_testing() -> Self {
        Self {
            port_release_timeout: Duration::from_millis(500),
            port_probe_interval: Duration::from_millis(5),
            port_probe_max_interval: Duration::from_millis(50),
            port_probe_connect_timeout: Duration::from_millis(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_port_normalization() {
        assert_eq!(normalize_port(0), 50007);
        assert_eq!(normalize_port(70000), 50007);
        assert_eq!(normalize_port(6881), 6881);
        assert_eq!(normalize_port(-1), 50007);
        assert_eq!(normalize_port(65535), 50007);
        assert_eq!(normalize_port(65534), 65534);
        assert_eq!(normalize_port(1), 1);
    }

    #[test]
    fn test_default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.download_directory, PathBuf::from("downloads"));
        assert_eq!(config.incoming_port, 50007);
        assert!(config.enable_upload);
        assert!(config.enable_seeding);
        assert!(config.enable_encryption);
    }

    #[test]
    fn test_snapshot_derives_directories() {
        let config = EngineConfig {
            incoming_port: 0,
            ..EngineConfig::default()
        };
        let snapshot = ConfigSnapshot::resolve(&config, Path::new("/srv/data"));
        assert_eq!(snapshot.incoming_port, 50007);
        assert_eq!(snapshot.config_directory, PathBuf::from("/srv/data/.config"));
        assert_eq!(
            snapshot.cache_directory,
            PathBuf::from("/srv/data/.config/torrents")
        );
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"downloadDirectory": "/tmp/x", "enableSeeding": false}"#)
                .unwrap();
        assert_eq!(config.download_directory, PathBuf::from("/tmp/x"));
        assert_eq!(config.incoming_port, 50007);
        assert!(!config.enable_seeding);
        assert!(config.enable_upload);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("CLOUDSEED_DOWNLOAD_DIR", "/var/lib/cloudseed");
            std::env::set_var("CLOUDSEED_PORT", "6881");
            std::env::set_var("CLOUDSEED_ENABLE_UPLOAD", "false");
            std::env::set_var("CLOUDSEED_ENABLE_ENCRYPTION", "not-a-bool");
        }

        let config = EngineConfig::from_env();

        assert_eq!(
            config.download_directory,
            PathBuf::from("/var/lib/cloudseed")
        );
        assert_eq!(config.incoming_port, 6881);
        assert!(!config.enable_upload);
        assert!(config.enable_encryption);

        // Cleanup
        unsafe {
            std::env::remove_var("CLOUDSEED_DOWNLOAD_DIR");
            std::env::remove_var("CLOUDSEED_PORT");
            std::env::remove_var("CLOUDSEED_ENABLE_UPLOAD");
            std::env::remove_var("CLOUDSEED_ENABLE_ENCRYPTION");
        }
    }

    proptest! {
        #[test]
        fn prop_normalized_port_is_usable(port in any::<i32>()) {
            let normalized = normalize_port(port);
            prop_assert!(normalized > 0 && normalized < 65535);
            if port > 0 && port < 65535 {
                prop_assert_eq!(i32::from(normalized), port);
            }
        }
    }
}
