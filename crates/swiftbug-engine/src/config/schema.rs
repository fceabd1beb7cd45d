use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::DEFAULT_CHANNEL_CAPACITY;
use crate::restore::RestoreOptions;

/// Process-level configuration. User-facing capture settings live in the
/// report store instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwiftbugConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the persisted reports, settings and fetch cache.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    /// Where exported report files are written.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".swiftbug").join("data"))
        .unwrap_or_else(|| PathBuf::from(".swiftbug-data"))
}

fn default_export_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Unset means wait for "load complete" indefinitely.
    #[serde(default)]
    pub load_timeout_ms: Option<u64>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            load_timeout_ms: None,
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    1000
}

impl From<&RestoreConfig> for RestoreOptions {
    fn from(config: &RestoreConfig) -> Self {
        RestoreOptions {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            load_timeout: config.load_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Extra console substrings to treat as extension noise.
    #[serde(default)]
    pub noise_patterns: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            noise_patterns: Vec::new(),
        }
    }
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_port")]
    pub port: u16,
    /// How long a call waits for the extension to connect.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            port: default_remote_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reply_timeout_secs: default_reply_timeout_secs(),
        }
    }
}

fn default_remote_port() -> u16 {
    9001
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_reply_timeout_secs() -> u64 {
    30
}
