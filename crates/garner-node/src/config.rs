//! Configuration file management.
//!
//! One `garner.toml` in the data directory; every field has a default so
//! an empty file (or none at all) yields a working node.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Backup pipeline settings.
    #[serde(default)]
    pub backup: BackupConfig,
    /// Supplier fleet settings.
    #[serde(default)]
    pub fleet: FleetSection,
    /// Relay router settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 0 = OS-assigned ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Per-request response timeout, seconds.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// This node's identity URL. Empty until registered.
    #[serde(default)]
    pub idurl: String,
    /// Contacts advertised in the identity document.
    #[serde(default)]
    pub contacts: Vec<String>,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Bytes asked of each hired supplier.
    #[serde(default = "default_needed_bytes")]
    pub needed_bytes: u64,
    /// Bytes donated to each accepted customer.
    #[serde(default = "default_donated_bytes")]
    pub donated_bytes: u64,
}

/// Backup pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Erasure layout for new versions.
    #[serde(default = "default_ecc_map")]
    pub ecc_map: String,
    /// Producer block size, bytes; a power of two.
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Restore fetch rounds per block.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Supplier fleet configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSection {
    /// Desired supplier count; 0 = follow the erasure layout.
    #[serde(default)]
    pub desired_suppliers: usize,
    /// Seconds a slot may stay disconnected before it is fired.
    #[serde(default = "default_fire_timeout")]
    pub fire_timeout_secs: u64,
    /// Seconds between liveness pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Consecutive ping failures that drop a connection.
    #[serde(default = "default_ping_failures")]
    pub ping_failure_threshold: u32,
}

/// Relay router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Run the relay router service.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Most client routes held at once.
    #[serde(default = "default_max_routes")]
    pub max_routes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub file: String,
}

fn default_response_timeout() -> u64 {
    20
}
fn default_needed_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_donated_bytes() -> u64 {
    8 * 1024 * 1024 * 1024
}
fn default_ecc_map() -> String {
    "ecc/4x4".to_string()
}
fn default_block_size() -> u32 {
    256 * 1024
}
fn default_max_retries() -> u32 {
    3
}
fn default_fire_timeout() -> u64 {
    600
}
fn default_ping_interval() -> u64 {
    60
}
fn default_ping_failures() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_max_routes() -> usize {
    20
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            idurl: String::new(),
            contacts: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            needed_bytes: default_needed_bytes(),
            donated_bytes: default_donated_bytes(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            ecc_map: default_ecc_map(),
            block_size: default_block_size(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            desired_suppliers: 0,
            fire_timeout_secs: default_fire_timeout(),
            ping_interval_secs: default_ping_interval(),
            ping_failure_threshold: default_ping_failures(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_routes: default_max_routes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

impl NodeConfig {
    /// Read a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Write the config back out.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text.as_bytes())?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// The resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".garner")
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config: NodeConfig = toml::from_str("").expect("parse");
        assert_eq!(config.backup.ecc_map, "ecc/4x4");
        assert_eq!(config.backup.block_size, 256 * 1024);
        assert!(config.relay.enabled);
        assert_eq!(config.relay.max_routes, 20);
        assert_eq!(config.fleet.fire_timeout_secs, 600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: NodeConfig = toml::from_str(
            "[backup]\necc_map = \"ecc/2x2\"\n\n[relay]\nenabled = false\n",
        )
        .expect("parse");
        assert_eq!(config.backup.ecc_map, "ecc/2x2");
        assert_eq!(config.backup.block_size, 256 * 1024);
        assert!(!config.relay.enabled);
    }

    #[test]
    fn test_load_save_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("garner.toml");

        let mut config = NodeConfig::default();
        config.identity.idurl = "https://id.example.net/alice.xml".to_string();
        config.save(&path).expect("save");

        let loaded = NodeConfig::load(&path).expect("load");
        assert_eq!(loaded.identity.idurl, config.identity.idurl);
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = NodeConfig::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.backup.ecc_map, "ecc/4x4");
    }

    #[test]
    fn test_data_dir_override() {
        let mut config = NodeConfig::default();
        config.storage.data_dir = "/srv/garner".to_string();
        assert_eq!(config.data_dir(), PathBuf::from("/srv/garner"));
    }
}
