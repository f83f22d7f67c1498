//! Configuration loading and API endpoint resolution
//!
//! Bootstrap configuration comes from an optional TOML file. Settings sources
//! in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::pricing::{PricingConfig, PricingTable};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Compiled default backend location
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable overriding the backend location
pub const API_URL_ENV: &str = "AVERION_API_URL";

/// Environment variable carrying a pre-issued access token
pub const TOKEN_ENV: &str = "AVERION_TOKEN";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Backend base URL (e.g. `https://api.averionlabs.com`)
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Overrides the built-in tier table and model prices
    #[serde(default)]
    pub pricing: Option<PricingConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Job status polling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between status requests
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Non-terminal responses tolerated before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fail immediately when the status endpoint reports an unknown job
    #[serde(default = "default_fail_fast_on_not_found")]
    pub fail_fast_on_not_found: bool,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Reject settings that would spin without delay or give up immediately
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::Config(
                "polling.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "polling.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            fail_fast_on_not_found: default_fail_fast_on_not_found(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    20
}

fn default_fail_fast_on_not_found() -> bool {
    true
}

/// HTTP timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Ordinary JSON requests
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Single-image upload
    #[serde(default = "default_single_upload_timeout_secs")]
    pub single_upload_timeout_secs: u64,

    /// Multi-image batch upload
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            single_upload_timeout_secs: default_single_upload_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_single_upload_timeout_secs() -> u64 {
    60
}

fn default_upload_timeout_secs() -> u64 {
    180
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)?;
        config.polling.validate()?;
        Ok(config)
    }

    /// Load configuration, degrading gracefully when no file exists
    ///
    /// An explicit path must exist. Without one, the platform default path is
    /// tried; if it is absent the compiled defaults are used with a warning.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!("Loading config from {}", path.display());
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            Some(path) => {
                warn!(
                    "No config file at {}, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("Could not determine config directory, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validated pricing table (built-in table when no `[pricing]` section)
    pub fn pricing_table(&self) -> Result<PricingTable> {
        match &self.pricing {
            Some(pricing) => PricingTable::from_config(pricing.clone()),
            None => Ok(PricingTable::default()),
        }
    }
}

/// Platform config file location: `<config_dir>/averion/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("averion").join("config.toml"))
}

/// Resolve the backend base URL
///
/// Priority: CLI argument → `AVERION_API_URL` → TOML `api_url` → default.
/// Trailing slashes are stripped so paths can be appended directly.
pub fn resolve_api_url(cli_arg: Option<&str>, toml_config: &TomlConfig) -> String {
    // Priority 1: Command-line argument
    if let Some(url) = cli_arg.filter(|u| !u.trim().is_empty()) {
        return normalize_url(url);
    }

    // Priority 2: Environment variable
    if let Ok(url) = std::env::var(API_URL_ENV) {
        if !url.trim().is_empty() {
            return normalize_url(&url);
        }
    }

    // Priority 3: TOML config file
    if let Some(url) = toml_config.api_url.as_deref().filter(|u| !u.trim().is_empty()) {
        return normalize_url(url);
    }

    // Priority 4: Compiled default
    DEFAULT_API_URL.to_string()
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
