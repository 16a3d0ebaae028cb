//! TOML configuration.
//!
//! `[db]` and `[backend]` are required; every other section has defaults.
//! See [`load_config`] for the validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recall_core::retry::RetryPolicy;
use recall_core::rotation::RotationConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rotation: RotationSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub paths: BackendPaths,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// REST paths relative to `base_url`. `{kind}` expands to `like`,
/// `bookmark` or `comment_like`.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendPaths {
    #[serde(default = "default_links_path")]
    pub links: String,
    #[serde(default = "default_visit_path")]
    pub visit: String,
    #[serde(default = "default_toggle_path")]
    pub toggle: String,
    #[serde(default = "default_status_path")]
    pub status: String,
    #[serde(default = "default_create_comment_path")]
    pub create_comment: String,
    #[serde(default = "default_list_comments_path")]
    pub list_comments: String,
}

impl Default for BackendPaths {
    fn default() -> Self {
        Self {
            links: default_links_path(),
            visit: default_visit_path(),
            toggle: default_toggle_path(),
            status: default_status_path(),
            create_comment: default_create_comment_path(),
            list_comments: default_list_comments_path(),
        }
    }
}

fn default_links_path() -> String {
    "/links/page".to_string()
}
fn default_visit_path() -> String {
    "/links/visit".to_string()
}
fn default_toggle_path() -> String {
    "/interactions/{kind}/toggle".to_string()
}
fn default_status_path() -> String {
    "/interactions/{kind}/status".to_string()
}
fn default_create_comment_path() -> String {
    "/comments/create".to_string()
}
fn default_list_comments_path() -> String {
    "/comments/list".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            growth_factor: default_growth_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    300
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_growth_factor() -> f64 {
    1.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RotationSettings {
    #[serde(default = "default_max_page_advances")]
    pub max_page_advances: u32,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            max_page_advances: default_max_page_advances(),
        }
    }
}

fn default_max_page_advances() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms)
    }

    /// Policy for background calls and toggle dispatch.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
        )
        .with_timeout(self.request_timeout())
        .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
        .with_growth_factor(self.retry.growth_factor)
    }

    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            fetch_timeout: self.request_timeout(),
            report_policy: self.retry_policy(),
            max_page_advances: self.rotation.max_page_advances,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let base_url = config.backend.base_url.trim();
    if base_url.is_empty() {
        anyhow::bail!("backend.base_url must not be empty");
    }
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        anyhow::bail!(
            "backend.base_url must start with http:// or https://, got '{}'",
            base_url
        );
    }
    if config.backend.request_timeout_ms == 0 {
        anyhow::bail!("backend.request_timeout_ms must be > 0");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.growth_factor < 1.0 {
        anyhow::bail!("retry.growth_factor must be >= 1.0");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        anyhow::bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    if config.rotation.max_page_advances == 0 {
        anyhow::bail!("rotation.max_page_advances must be >= 1");
    }

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        anyhow::bail!("server.bind must be a socket address, got '{}'", config.server.bind);
    }

    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" | "off" => {}
        other => anyhow::bail!(
            "Unknown logging.level: '{}'. Must be trace, debug, info, warn, error, or off.",
            other
        ),
    }

    Ok(())
}
