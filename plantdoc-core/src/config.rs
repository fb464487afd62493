//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/plantdoc/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/plantdoc/` (~/.config/plantdoc/)
//! - Data: `$XDG_DATA_HOME/plantdoc/` (~/.local/share/plantdoc/)
//! - State/Logs: `$XDG_STATE_HOME/plantdoc/` (~/.local/state/plantdoc/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// History paging limits
    #[serde(default)]
    pub history: HistoryConfig,

    /// Analytics configuration
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Plant identification service
    #[serde(default)]
    pub plant_id: PlantIdConfig,

    /// Generative text service (disease info and chat)
    #[serde(default)]
    pub llm: LlmConfig,

    /// Weather service
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// History paging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    /// Page size used when the caller does not pass one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound for any requested page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

/// Upper bound for `analytics.active_window_days` (about a century)
pub const MAX_ACTIVE_WINDOW_DAYS: i64 = 36_500;

/// Upper bound for `analytics.global_refresh_secs` (one week)
pub const MAX_GLOBAL_REFRESH_SECS: u64 = 7 * 86_400;

/// Analytics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Number of entries in top-disease / top-plant rankings
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// A user counts as active if they recorded a detection within this many days
    #[serde(default = "default_active_window_days")]
    pub active_window_days: i64,

    /// How long a computed global overview is served before recomputing
    #[serde(default = "default_global_refresh_secs")]
    pub global_refresh_secs: u64,

    /// Number of recent detections included in a personal overview
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            active_window_days: default_active_window_days(),
            global_refresh_secs: default_global_refresh_secs(),
            recent_limit: default_recent_limit(),
        }
    }
}

fn default_top_n() -> usize {
    5
}

fn default_active_window_days() -> i64 {
    30
}

fn default_global_refresh_secs() -> u64 {
    300
}

fn default_recent_limit() -> u32 {
    10
}

/// Plant identification (Kindwise crop.health) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PlantIdConfig {
    /// API endpoint
    #[serde(default = "default_plant_id_endpoint")]
    pub endpoint: String,

    /// API key (can also use KINDWISE_API_KEY env var)
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_plant_id_timeout")]
    pub timeout_secs: u64,
}

impl Default for PlantIdConfig {
    fn default() -> Self {
        Self {
            endpoint: default_plant_id_endpoint(),
            api_key: None,
            timeout_secs: default_plant_id_timeout(),
        }
    }
}

impl PlantIdConfig {
    /// API key from config, falling back to `KINDWISE_API_KEY`
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("KINDWISE_API_KEY").ok())
    }

    /// Check if the service can be called
    pub fn is_ready(&self) -> bool {
        self.resolved_api_key().is_some()
    }
}

fn default_plant_id_endpoint() -> String {
    "https://crop.kindwise.com/api/v1".to_string()
}

fn default_plant_id_timeout() -> u64 {
    30
}

/// Generative text (Gemini) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// API endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API key (can also use GEMINI_API_KEY env var)
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    /// API key from config, falling back to `GEMINI_API_KEY`
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
    }

    /// Check if the service can be called
    pub fn is_ready(&self) -> bool {
        self.resolved_api_key().is_some()
    }
}

fn default_llm_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_llm_model() -> String {
    "gemini-pro".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

/// Weather (OpenWeatherMap) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WeatherConfig {
    /// API endpoint
    #[serde(default = "default_weather_endpoint")]
    pub endpoint: String,

    /// API key (can also use OPENWEATHER_API_KEY env var)
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_weather_timeout")]
    pub timeout_secs: u64,

    /// Unit system passed to the API ("metric" or "imperial")
    #[serde(default = "default_weather_units")]
    pub units: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            endpoint: default_weather_endpoint(),
            api_key: None,
            timeout_secs: default_weather_timeout(),
            units: default_weather_units(),
        }
    }
}

impl WeatherConfig {
    /// API key from config, falling back to `OPENWEATHER_API_KEY`
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENWEATHER_API_KEY").ok())
    }

    /// Check if the service can be called
    pub fn is_ready(&self) -> bool {
        self.resolved_api_key().is_some()
    }
}

fn default_weather_endpoint() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}

fn default_weather_timeout() -> u64 {
    30
}

fn default_weather_units() -> String {
    "metric".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate value ranges, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.history.max_page_size == 0 {
            return Err(Error::Config(
                "history.max_page_size must be at least 1".to_string(),
            ));
        }
        if self.history.default_page_size == 0
            || self.history.default_page_size > self.history.max_page_size
        {
            return Err(Error::Config(
                "history.default_page_size must be between 1 and history.max_page_size"
                    .to_string(),
            ));
        }
        if self.analytics.top_n == 0 {
            return Err(Error::Config(
                "analytics.top_n must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_ACTIVE_WINDOW_DAYS).contains(&self.analytics.active_window_days) {
            return Err(Error::Config(format!(
                "analytics.active_window_days must be between 1 and {}",
                MAX_ACTIVE_WINDOW_DAYS
            )));
        }
        if self.analytics.global_refresh_secs > MAX_GLOBAL_REFRESH_SECS {
            return Err(Error::Config(format!(
                "analytics.global_refresh_secs must be at most {}",
                MAX_GLOBAL_REFRESH_SECS
            )));
        }
        for (name, secs) in [
            ("plant_id", self.plant_id.timeout_secs),
            ("llm", self.llm.timeout_secs),
            ("weather", self.weather.timeout_secs),
        ] {
            if secs == 0 {
                return Err(Error::Config(format!(
                    "{}.timeout_secs must be at least 1",
                    name
                )));
            }
        }
        if !matches!(self.weather.units.as_str(), "metric" | "imperial") {
            return Err(Error::Config(
                "weather.units must be \"metric\" or \"imperial\"".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/plantdoc/config.toml` (~/.config/plantdoc/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("plantdoc").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/plantdoc/` (~/.local/share/plantdoc/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("plantdoc")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/plantdoc/` (~/.local/state/plantdoc/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("plantdoc")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/plantdoc/data.db` (~/.local/share/plantdoc/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.history.default_page_size, 20);
        assert_eq!(config.history.max_page_size, 100);
        assert_eq!(config.analytics.top_n, 5);
        assert_eq!(config.analytics.global_refresh_secs, 300);
        assert_eq!(config.plant_id.timeout_secs, 30);
        assert_eq!(config.llm.timeout_secs, 60);
        assert_eq!(config.llm.model, "gemini-pro");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[history]
default_page_size = 10
max_page_size = 50

[analytics]
top_n = 3
active_window_days = 7

[llm]
model = "gemini-1.5-flash"
api_key = "test-key"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.history.default_page_size, 10);
        assert_eq!(config.history.max_page_size, 50);
        assert_eq!(config.analytics.top_n, 3);
        assert_eq!(config.analytics.active_window_days, 7);
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert!(config.llm.is_ready());
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut config = Config::default();
        config.history.default_page_size = 500;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.plant_id.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.weather.units = "kelvin".to_string();
        assert!(config.validate().is_err());

        for days in [0, -1, MAX_ACTIVE_WINDOW_DAYS + 1, i64::MAX] {
            let mut config = Config::default();
            config.analytics.active_window_days = days;
            assert!(config.validate().is_err(), "window {} accepted", days);
        }
        let mut config = Config::default();
        config.analytics.active_window_days = MAX_ACTIVE_WINDOW_DAYS;
        assert!(config.validate().is_ok());

        for secs in [MAX_GLOBAL_REFRESH_SECS + 1, i64::MAX as u64, u64::MAX] {
            let mut config = Config::default();
            config.analytics.global_refresh_secs = secs;
            assert!(config.validate().is_err(), "refresh {} accepted", secs);
        }
        let mut config = Config::default();
        config.analytics.global_refresh_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_analytics_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analytics]\nactive_window_days = 9223372036854775807\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_endpoints() {
        let config = Config::default();
        assert_eq!(config.plant_id.endpoint, "https://crop.kindwise.com/api/v1");
        assert_eq!(
            config.weather.endpoint,
            "https://api.openweathermap.org/data/2.5"
        );
    }
}
