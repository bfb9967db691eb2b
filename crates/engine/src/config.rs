// Engine configuration: `~/.engram/config.toml`, every field defaulted.
//
// Environment overrides: `ANTHROPIC_API_KEY` for the oracle key and
// `ENGRAM_WEBHOOK_SECRET` for the webhook secret, both taking precedence
// over the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root directory for Engram global state: `~/.engram/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".engram"))
}

/// Path to the global config file: `~/.engram/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub sync: SyncSettings,
    pub github: GithubSettings,
    pub oracle: OracleSettings,
    pub store: StoreSettings,
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Load from `~/.engram/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Scheduler cadence and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Period between scheduler cycles, in seconds.
    pub cycle_interval_sec: u64,
    /// Minimum gap between two cycles of the same connection, in seconds.
    pub min_connection_interval_sec: u64,
    /// Worker-pool size for per-connection cycles.
    pub workers: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { cycle_interval_sec: 300, min_connection_interval_sec: 120, workers: 4 }
    }
}

/// Version-control provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GithubSettings {
    /// REST API base URL. `None` uses the public github.com API; set this
    /// for enterprise deployments.
    pub api_url: Option<String>,
}

impl GithubSettings {
    pub fn resolved_api_url(&self) -> String {
        self.api_url.clone().unwrap_or_else(|| "https://api.github.com".to_string())
    }
}

/// Language-model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleSettings {
    /// API keys come from the environment, not from config files.
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub max_tokens: usize,
    pub enabled: bool,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self { model: None, api_url: None, max_tokens: 4096, enabled: true }
    }
}

impl OracleSettings {
    /// Resolve the API key: environment first, nothing else.
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        std::env::var("ANTHROPIC_API_KEY").ok().and_then(trimmed_non_empty)
    }
}

/// Connection-store persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    /// SQLite database path. `None` uses `~/.engram/engram.db`.
    pub db_path: Option<PathBuf>,
    /// JSON fallback file used when the database cannot be opened.
    pub fallback_path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { db_path: None, fallback_path: None }
    }
}

impl StoreSettings {
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .or_else(|| global_dir().map(|d| d.join("engram.db")))
            .unwrap_or_else(|| PathBuf::from("engram.db"))
    }

    pub fn resolved_fallback_path(&self) -> PathBuf {
        self.fallback_path
            .clone()
            .or_else(|| global_dir().map(|d| d.join("connections.json")))
            .unwrap_or_else(|| PathBuf::from("connections.json"))
    }
}

/// HTTP surface settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// Webhook HMAC secret. The `ENGRAM_WEBHOOK_SECRET` environment
    /// variable takes precedence.
    pub webhook_secret: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { listen_addr: "0.0.0.0:8080".into(), webhook_secret: None }
    }
}

impl ServerSettings {
    pub fn resolve_webhook_secret(&self) -> Option<String> {
        std::env::var("ENGRAM_WEBHOOK_SECRET")
            .ok()
            .and_then(trimmed_non_empty)
            .or_else(|| self.webhook_secret.as_deref().and_then(trimmed_non_empty))
    }
}

fn trimmed_non_empty(value: impl AsRef<str>) -> Option<String> {
    let value = value.as_ref().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
