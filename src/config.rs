//! Configuration loader and validator for the show-watch bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub window: Window,
    pub telegram: Telegram,
    pub collector: Collector,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Fixed period between pipeline runs.
    pub scrape_interval_secs: u64,
    /// Fixed delay between consecutive outbound sends.
    pub send_delay_ms: u64,
    /// Lifetime of an inline suppress button.
    pub action_ttl_secs: u64,
}

/// Operating window: runs start only when the local hour (in `timezone`)
/// falls inside `[start_hour, end_hour)`. `start_hour > end_hour` wraps
/// past midnight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub timezone: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Announcement channel for broadcasts and operator notices.
    pub channel_id: i64,
}

/// Members-site collector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collector {
    pub base_url: String,
    /// Host for poster images when they live on a separate static domain.
    #[serde(default)]
    pub image_base_url: Option<String>,
    pub username: String,
    pub password: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Cap on one whole observation (login + fetch) end to end.
    pub observe_timeout_secs: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file, apply environment overrides for
/// secrets, and validate.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

/// Secrets may be supplied by environment instead of the YAML file.
fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(token) = std::env::var("SHOWWATCH_BOT_TOKEN") {
        cfg.telegram.bot_token = token;
    }
    if let Ok(username) = std::env::var("SHOWWATCH_COLLECTOR_USERNAME") {
        cfg.collector.username = username;
    }
    if let Ok(password) = std::env::var("SHOWWATCH_COLLECTOR_PASSWORD") {
        cfg.collector.password = password;
    }
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.scrape_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.scrape_interval_secs must be > 0"));
    }
    if cfg.app.action_ttl_secs == 0 {
        return Err(ConfigError::Invalid("app.action_ttl_secs must be > 0"));
    }

    if cfg.window.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(ConfigError::Invalid(
            "window.timezone must be a valid IANA time zone name",
        ));
    }
    if cfg.window.start_hour > 23 {
        return Err(ConfigError::Invalid("window.start_hour must be in 0..=23"));
    }
    if cfg.window.end_hour > 24 {
        return Err(ConfigError::Invalid("window.end_hour must be in 0..=24"));
    }
    if cfg.window.start_hour == cfg.window.end_hour {
        return Err(ConfigError::Invalid(
            "window.start_hour and window.end_hour must differ",
        ));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.channel_id == 0 {
        return Err(ConfigError::Invalid("telegram.channel_id must be set"));
    }

    if cfg.collector.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("collector.base_url must be non-empty"));
    }
    if cfg.collector.username.trim().is_empty() {
        return Err(ConfigError::Invalid("collector.username must be non-empty"));
    }
    if cfg.collector.password.trim().is_empty() {
        return Err(ConfigError::Invalid("collector.password must be non-empty"));
    }
    if cfg.collector.timeout_secs == 0 {
        return Err(ConfigError::Invalid("collector.timeout_secs must be > 0"));
    }
    if cfg.collector.observe_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "collector.observe_timeout_secs must be > 0",
        ));
    }

    Ok(())
}

/// Example configuration shipped with the repository.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  scrape_interval_secs: 120
  send_delay_ms: 1000
  action_ttl_secs: 3600

window:
  timezone: "America/Los_Angeles"
  start_hour: 8
  end_hour: 17

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  channel_id: -1001234567890

collector:
  base_url: "https://members.example-tickets.com"
  image_base_url: "https://static.example-tickets.com"
  username: "you@example.com"
  password: "YOUR_MEMBER_PASSWORD"
  timeout_secs: 60
  observe_timeout_secs: 180
"#
}
