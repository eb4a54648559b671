//! Configuration management for novelsync.
//!
//! Configuration is read from `~/.config/novelsync/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub crawler: CrawlerConfig,
    pub sites: Vec<SiteConfig>,
}

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file (None = `<data dir>/novelsync/novelsync.db`)
    pub path: Option<PathBuf>,
    /// SQLite busy timeout in milliseconds (default: 5000)
    pub busy_timeout_ms: u64,
    /// Retries for an operation that still hits a locked database (default: 3)
    pub retry_attempts: u32,
    /// First backoff delay, doubled on each retry (default: 100)
    pub retry_base_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5000,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Backoff before retry number `attempt` (0-based): 100ms, 200ms, 400ms...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1 << attempt.min(16)))
    }
}

/// Crawl engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Consecutive failures after which a novel is skipped (default: 3)
    pub failure_threshold: usize,
    /// Pause after every crawled novel in milliseconds (default: 500)
    pub base_delay_ms: u64,
    /// Extra pause per new chapter in milliseconds (default: 200)
    pub per_chapter_delay_ms: u64,
    /// Upper bound on the pause in seconds (default: 10)
    pub max_delay_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base_delay_ms: 500,
            per_chapter_delay_ms: 200,
            max_delay_secs: 10,
        }
    }
}

impl CrawlerConfig {
    /// Politeness delay after fetching `new_chapters` chapters.
    pub fn politeness_delay(&self, new_chapters: usize) -> Duration {
        let per_chapter = self
            .per_chapter_delay_ms
            .saturating_mul(new_chapters as u64);
        let delay = Duration::from_millis(self.base_delay_ms.saturating_add(per_chapter));
        delay.min(Duration::from_secs(self.max_delay_secs))
    }

    /// A configuration with no pauses, for tests and local fixtures.
    pub fn without_delays() -> Self {
        Self {
            base_delay_ms: 0,
            per_chapter_delay_ms: 0,
            max_delay_secs: 0,
            ..Default::default()
        }
    }
}

/// One crawlable site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Detail URL template; `{id}` is replaced with the novel id
    pub url: String,
    /// Parser kind used to fetch this site (e.g. "json")
    pub parser: String,
    /// Where artifacts are written; a leading `~` is expanded
    #[serde(default = "default_storage_folder")]
    pub storage_folder: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_storage_folder() -> String {
    "~/novels".to_string()
}

impl SiteConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        expand_home(&self.storage_folder)
    }
}

pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            Self::create_default_config(config_path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::Io {
            path: config_path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/novelsync/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("novelsync").join("config.toml"))
    }

    pub fn site(&self, id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == id)
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> String {
        r##"# novelsync configuration

[database]
# Database file; defaults to <data dir>/novelsync/novelsync.db
# path = "/home/me/.local/share/novelsync/novelsync.db"

# How long SQLite waits on a locked database (milliseconds)
busy_timeout_ms = 5000

# Retries for an operation that still finds the database locked,
# backing off 100ms, 200ms, 400ms...
retry_attempts = 3
retry_base_delay_ms = 100

[crawler]
# Novels that failed this many times in a row are skipped
failure_threshold = 3

# Pause between novels: base + per new chapter, capped
base_delay_ms = 500
per_chapter_delay_ms = 200
max_delay_secs = 10

# Sites are listed as [[sites]] tables:
#
# [[sites]]
# id = "example"
# name = "Example Novels"
# url = "https://novels.example.com/api/novel/{id}.json"
# parser = "json"
# storage_folder = "~/novels/example"
# tags = ["web-novel"]
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
