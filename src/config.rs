//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

/// Lowest accepted auto-refresh delay.
pub const MIN_REFRESH_DELAY_MS: u64 = 250;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Data Source ===
    /// Root of the local data tree (contains `arb_output/arb_opportunities`).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Remote base URL serving the same tree; takes precedence over `data_dir`.
    #[serde(default)]
    pub feed_url: Option<String>,

    /// Local override for the label dictionary.
    #[serde(default)]
    pub labels_path: Option<PathBuf>,

    /// Where UI preferences are persisted.
    #[serde(default = "default_preferences_path")]
    pub preferences_path: PathBuf,

    // === Refresh ===
    /// Delay between `watch` refreshes in milliseconds.
    #[serde(default = "default_refresh_delay")]
    pub refresh_delay_ms: u64,

    /// HTTP request timeout in milliseconds (remote feed only).
    #[serde(default = "default_http_timeout")]
    pub http_timeout_ms: u64,

    // === Server Configuration ===
    /// HTTP server port for health/metrics/board endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_preferences_path() -> PathBuf {
    PathBuf::from(".arb-dashboard.json")
}

fn default_refresh_delay() -> u64 {
    5_000
}

fn default_http_timeout() -> u64 {
    5_000
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            feed_url: None,
            labels_path: None,
            preferences_path: default_preferences_path(),
            refresh_delay_ms: default_refresh_delay(),
            http_timeout_ms: default_http_timeout(),
            port: default_port(),
            rust_log: default_log_level(),
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_delay_ms < MIN_REFRESH_DELAY_MS {
            return Err(format!(
                "REFRESH_DELAY_MS must be at least {}",
                MIN_REFRESH_DELAY_MS
            ));
        }

        if self.http_timeout_ms == 0 {
            return Err("HTTP_TIMEOUT_MS must be positive".to_string());
        }

        if let Some(raw) = &self.feed_url {
            Url::parse(raw).map_err(|e| format!("FEED_URL is not a valid URL: {}", e))?;
        }

        Ok(())
    }

    /// Whether the remote HTTP feed is configured.
    pub fn uses_remote_feed(&self) -> bool {
        self.feed_url.is_some()
    }
}
