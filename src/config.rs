use crate::error::MarginResult;
use crate::search::MatchOptions;
use crate::search::query::DEFAULT_LIMIT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("margin")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`, used by the sqlite backend.
    pub db_file: String,
    pub backup_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
            db_file: "margin.db".to_string(),
            backup_capacity: crate::recovery::backup::DEFAULT_CAPACITY,
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            enabled: false,
            base_url: None,
            timeout_ms: 5000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The base URL, if the remote store is both enabled and configured.
    pub fn active_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .filter(|url| self.enabled && !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub threshold: f64,
    pub location: usize,
    pub distance: usize,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let matching = MatchOptions::default();
        SearchConfig {
            threshold: matching.threshold,
            location: matching.location,
            distance: matching.distance,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchConfig {
    pub fn matching(&self) -> MatchOptions {
        MatchOptions {
            threshold: self.threshold,
            location: self.location,
            distance: self.distance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the config file at `path`, writing a default one first if it
    /// does not exist yet.
    pub fn load(path: &Path) -> MarginResult<Self> {
        if !path.exists() {
            let config = AppConfig::default();
            config.save(path)?;
            return Ok(config);
        }

        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> MarginResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Config rooted in a given data directory, with everything else default.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        AppConfig {
            storage: StorageConfig {
                data_dir: data_dir.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
