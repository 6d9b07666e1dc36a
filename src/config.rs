//! Configuration and settings management
//!
//! Loads settings from `.env`, optional config files and environment variables,
//! and defines the queue and retry constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token (`TELEGRAM_TOKEN`, or the legacy `TOKEN`)
    pub telegram_token: String,

    /// Telegram ID of the global super-admin
    pub admin_id: i64,

    /// Admissions allowed per user inside one rate window
    #[serde(default = "default_rate_limit_messages")]
    pub rate_limit_messages: usize,

    /// Length of the rate window in seconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window: u64,

    /// Longest media duration accepted into the queue
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u32,

    /// Largest fetched file that will be delivered, in megabytes
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,

    /// Maximum number of pending items in the global queue
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,

    /// Number of items listed by `/queue`
    #[serde(default = "default_queue_preview_len")]
    pub queue_preview_len: usize,

    /// Path of the persisted group settings file
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// yt-dlp executable
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: String,

    /// Optional expiry for a pending welcome capture
    pub welcome_capture_timeout_secs: Option<u64>,
}

const fn default_rate_limit_messages() -> usize {
    5
}

const fn default_rate_limit_window() -> u64 {
    60
}

const fn default_max_duration_secs() -> u32 {
    MAX_DURATION_SECS
}

const fn default_max_file_size_mb() -> u64 {
    50
}

const fn default_max_queue_len() -> usize {
    50
}

const fn default_queue_preview_len() -> usize {
    10
}

fn default_data_file() -> PathBuf {
    PathBuf::from("group_data.json")
}

fn default_ytdlp_path() -> String {
    "yt-dlp".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use muskan_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the token / admin id is missing.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder();
        // Legacy `TOKEN` is only a fallback; `TELEGRAM_TOKEN` from any source wins
        if let Some(token) = std::env::var("TOKEN").ok().filter(|t| !t.trim().is_empty()) {
            builder = builder.set_default("telegram_token", token)?;
        }

        let s = builder
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Eg.. `APP__ADMIN_ID=1 ./target/muskan-bot`
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables, empty ones treated as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message("TELEGRAM_TOKEN is empty".to_string()));
        }
        if self.rate_limit_messages == 0 {
            return Err(ConfigError::Message(
                "RATE_LIMIT_MESSAGES must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Rate window as a `Duration`
    #[must_use]
    pub const fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window)
    }

    /// File size ceiling in bytes
    #[must_use]
    pub const fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Welcome capture expiry, if configured
    #[must_use]
    pub fn welcome_capture_timeout(&self) -> Option<Duration> {
        self.welcome_capture_timeout_secs.map(Duration::from_secs)
    }

    /// Settings with defaults for everything except the credentials
    #[must_use]
    pub fn with_credentials(telegram_token: impl Into<String>, admin_id: i64) -> Self {
        Self {
            telegram_token: telegram_token.into(),
            admin_id,
            rate_limit_messages: default_rate_limit_messages(),
            rate_limit_window: default_rate_limit_window(),
            max_duration_secs: default_max_duration_secs(),
            max_file_size_mb: default_max_file_size_mb(),
            max_queue_len: default_max_queue_len(),
            queue_preview_len: default_queue_preview_len(),
            data_file: default_data_file(),
            ytdlp_path: default_ytdlp_path(),
            welcome_capture_timeout_secs: None,
        }
    }
}

/// Default duration ceiling (15 minutes)
pub const MAX_DURATION_SECS: u32 = 900;

/// Longest a single yt-dlp fetch may run before the item fails (seconds)
pub const FETCH_TIMEOUT_SECS: u64 = 300;
/// Longest a single media upload may run before the item fails (seconds)
pub const UPLOAD_TIMEOUT_SECS: u64 = 300;

/// Number of matches listed by `/search`
pub const SEARCH_RESULTS_LIMIT: usize = 5;

/// Cooldown (seconds) between repeated "slow down" / "banned" notices to one user
pub const NOTICE_COOLDOWN_SECS: u64 = 60;
/// Maximum notice cache capacity
pub const NOTICE_CACHE_MAX_SIZE: u64 = 10_000;

// Telegram API retry configuration
/// Maximum retry attempts for a Telegram API call
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Single test so environment mutations cannot race each other
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("ADMIN_ID", "42");
        env::set_var("RATE_LIMIT_MESSAGES", "3");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        assert_eq!(settings.admin_id, 42);
        assert_eq!(settings.rate_limit_messages, 3);
        assert_eq!(settings.rate_limit_window, 60);
        assert_eq!(settings.max_duration_secs, 900);
        assert_eq!(settings.max_file_size_bytes(), 50 * 1024 * 1024);
        assert!(settings.welcome_capture_timeout().is_none());

        env::remove_var("ADMIN_ID");
        assert!(Settings::new().is_err(), "missing admin id must be fatal");

        env::set_var("ADMIN_ID", "42");
        env::set_var("RATE_LIMIT_MESSAGES", "0");
        assert!(Settings::new().is_err());

        env::set_var("RATE_LIMIT_MESSAGES", "3");

        // Both token names set: the explicit one wins, boot still succeeds
        env::set_var("TOKEN", "legacy_token");
        assert_eq!(Settings::new()?.telegram_token, "dummy_token");

        env::remove_var("TELEGRAM_TOKEN");
        assert_eq!(Settings::new()?.telegram_token, "legacy_token");

        env::remove_var("TOKEN");
        assert!(Settings::new().is_err(), "missing token must be fatal");

        env::remove_var("ADMIN_ID");
        env::remove_var("RATE_LIMIT_MESSAGES");
        Ok(())
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::with_credentials("t", 1);
        assert_eq!(settings.max_queue_len, 50);
        assert_eq!(settings.queue_preview_len, 10);
        assert_eq!(settings.rate_window(), Duration::from_secs(60));
        assert_eq!(settings.data_file, PathBuf::from("group_data.json"));
    }
}
