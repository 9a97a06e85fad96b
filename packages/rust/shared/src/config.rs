//! Application configuration for BuildLens.
//!
//! User config lives at `~/.buildlens/buildlens.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BuildLensError, Result};
use crate::types::SourceId;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "buildlens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".buildlens";

/// User-Agent sent by every adapter and the reasoning client.
pub const USER_AGENT: &str = "buildlens/0.1 (build analysis tool)";

// ---------------------------------------------------------------------------
// Config structs (matching buildlens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Per-source settings.
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory run reports are written under.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Path to the cache database.
    #[serde(default = "default_cache_path")]
    pub cache_path: String,

    /// Maximum concurrent fetches across all sources.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: u32,

    /// Wall-clock budget for the whole enrichment phase, in seconds.
    #[serde(default = "default_coordination_timeout")]
    pub coordination_timeout_secs: u64,

    /// Attempt ceiling per (entity, source) pair.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// First backoff delay; doubles per attempt.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_path: default_cache_path(),
            fetch_concurrency: default_fetch_concurrency(),
            coordination_timeout_secs: default_coordination_timeout(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

fn default_output_dir() -> String {
    "~/buildlens-reports".into()
}
fn default_cache_path() -> String {
    "~/.buildlens/cache.db".into()
}
fn default_fetch_concurrency() -> u32 {
    4
}
fn default_coordination_timeout() -> u64 {
    120
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    500
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Default model to use for build analysis.
    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}

/// `[sources]` section: one sub-table per external source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub poe2db: SourceSettings,
    #[serde(default)]
    pub wiki: SourceSettings,
    #[serde(default)]
    pub reddit: SourceSettings,
    #[serde(default)]
    pub forum: SourceSettings,
}

impl SourcesConfig {
    /// Settings for one source by id.
    pub fn settings_for(&self, source: SourceId) -> &SourceSettings {
        match source {
            SourceId::Poe2Db => &self.poe2db,
            SourceId::PoeWiki => &self.wiki,
            SourceId::Reddit => &self.reddit,
            SourceId::Forum => &self.forum,
        }
    }
}

/// Settings for a single external source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Whether the source participates in enrichment at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per rolling window.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Rolling window length in seconds.
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    /// Cache TTL for records from this source, in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl SourceSettings {
    /// TTL in seconds, the unit records carry.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_hours * 3600
    }
}

fn default_true() -> bool {
    true
}
fn default_rate_limit() -> u32 {
    10
}
fn default_rate_window() -> u64 {
    60
}
fn default_ttl_hours() -> u64 {
    24
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch-coordination configuration — merged from config file + CLI
/// flags.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum concurrent fetch tasks.
    pub concurrency: u32,
    /// Wall-clock budget for the enrichment phase, in seconds.
    pub coordination_timeout_secs: u64,
    /// Attempt ceiling per (entity, source) pair.
    pub retry_max_attempts: u32,
    /// First backoff delay in ms; doubles per attempt.
    pub retry_base_delay_ms: u64,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.defaults.fetch_concurrency,
            coordination_timeout_secs: config.defaults.coordination_timeout_secs,
            retry_max_attempts: config.defaults.retry_max_attempts,
            retry_base_delay_ms: config.defaults.retry_base_delay_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.buildlens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BuildLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.buildlens/buildlens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BuildLensError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BuildLensError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BuildLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BuildLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BuildLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| BuildLensError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(raw))
    }
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(BuildLensError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
