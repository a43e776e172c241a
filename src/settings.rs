//! Small persisted store for user preferences that sit next to the queue
//! (repeat mode). The synchronizer never reads it; the command layer does.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::get_config_dir;
use crate::errors::QueueError;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    All,
    One,
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(RepeatMode::Off),
            "all" => Ok(RepeatMode::All),
            "one" => Ok(RepeatMode::One),
            _ => Err(format!("Invalid repeat mode: '{}'. Valid: off, all, one", s)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub repeat: RepeatMode,
}

pub struct SettingsStore {
    path: Option<PathBuf>,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    pub fn open_default() -> Self {
        Self::open(get_config_dir().join("settings.json"))
    }

    /// Loads settings from `path`. A missing or unreadable file yields
    /// defaults; it is rewritten on the next change.
    pub fn open(path: PathBuf) -> Self {
        let settings = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt settings at {}: {}", path.display(), e);
                Settings::default()
            }),
            Err(_) => Settings::default(),
        };

        Self {
            path: Some(path),
            settings: RwLock::new(settings),
        }
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            settings: RwLock::new(Settings::default()),
        }
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.settings.read().repeat
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) -> Result<(), QueueError> {
        self.settings.write().repeat = mode;
        self.persist()
    }

    fn persist(&self) -> Result<(), QueueError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&*self.settings.read())
            .map_err(|e| QueueError::Config(e.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }
}
