use crate::humanize::{ByteSize, Ttl};
use crate::reclaimer::ReclaimPolicy;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// How long in-flight requests may run after shutdown begins
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

/// Metadata ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    /// Node discriminator embedded in generated record ids (0..=1023)
    #[serde(default = "default_node_id")]
    pub node_id: u16,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            node_id: default_node_id(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

fn default_node_id() -> u16 {
    1
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Largest accepted upload
    #[serde(default = "default_max_file_size")]
    pub max_file_size: ByteSize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/blobs")
}

fn default_max_file_size() -> ByteSize {
    ByteSize(100 * 1024 * 1024) // 100 MB
}

/// Expiry and reclamation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// TTL applied when an upload does not ask for one
    #[serde(default = "default_ttl")]
    pub default_ttl: Ttl,
    /// Longer requested TTLs are clamped to this
    #[serde(default = "default_max_ttl")]
    pub max_ttl: Ttl,
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
    #[serde(default)]
    pub policy: ReclaimPolicy,
}

impl RetentionConfig {
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    /// Resolve the TTL for an upload: the default when none was requested,
    /// never more than `max_ttl`
    pub fn effective_ttl(&self, requested: Option<Ttl>) -> Ttl {
        requested.unwrap_or(self.default_ttl).min(self.max_ttl)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            max_ttl: default_max_ttl(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
            policy: ReclaimPolicy::default(),
        }
    }
}

fn default_ttl() -> Ttl {
    Ttl::from_secs(24 * 60 * 60)
}

fn default_max_ttl() -> Ttl {
    Ttl::from_secs(7 * 24 * 60 * 60)
}

fn default_reclaim_interval_secs() -> u64 {
    60
}
