use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::QueueError;

pub const PRODUCT_NAME: &str = "plexq";
pub const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;
/// Below this much elapsed time "previous" goes back one item, above it the
/// current item restarts.
pub const DEFAULT_PREVIOUS_THRESHOLD_MS: u64 = 5000;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

pub const CONFIG_PATH_ENV: &str = "PLEXQ_CONFIG";
pub const SERVER_URL_ENV: &str = "PLEXQ_SERVER_URL";
pub const TOKEN_ENV: &str = "PLEXQ_TOKEN";

pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PRODUCT_NAME)
}

pub fn get_config_file_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| get_config_dir().join("config.json"))
}

fn new_client_identifier() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_device_name() -> String {
    "Desktop".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_url: String,
    pub token: String,
    /// The server's own identifier, used to build `server://` library URIs.
    pub machine_identifier: String,
    #[serde(default = "new_client_identifier")]
    pub client_identifier: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:32400".to_string(),
            token: String::new(),
            machine_identifier: String::new(),
            client_identifier: new_client_identifier(),
            device_name: default_device_name(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub previous_threshold_ms: u64,
    /// Start playback as soon as a new queue is loaded.
    pub auto_play: bool,
    pub heartbeat_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            previous_threshold_ms: DEFAULT_PREVIOUS_THRESHOLD_MS,
            auto_play: true,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Reads the config file, falling back to defaults when it does not exist
    /// yet, then applies environment overrides.
    pub fn load() -> Result<Self, QueueError> {
        let path = get_config_file_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, QueueError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            QueueError::Config(format!("Invalid config {}: {}", path.display(), e))
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), QueueError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| QueueError::Config(e.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(SERVER_URL_ENV) {
            self.server.server_url = url;
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            self.server.token = token;
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.server.server_url.trim().is_empty() {
            return Err(QueueError::Config("server_url is empty".to_string()));
        }
        if self.server.machine_identifier.trim().is_empty() {
            return Err(QueueError::Config(
                "machine_identifier is required to build library URIs".to_string(),
            ));
        }
        if self.sync.heartbeat_interval_secs == 0 {
            return Err(QueueError::Config(
                "heartbeat_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
