//! Application configuration
//!
//! Loaded in layers: embedded defaults, optional files under `config/`,
//! then `COURIER_*` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use courier_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorAppConfig,
    #[serde(default)]
    pub delivery: DeliveryAppConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directives, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Console format
    #[serde(default)]
    pub format: LogFormat,
    /// Directory for daily-rolling log files; console only when unset
    #[serde(default)]
    pub directory: Option<String>,
    /// Log file name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_log_level() -> String {
    "courier=info".to_string()
}

fn default_file_prefix() -> String {
    "courier.log".to_string()
}

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Orchestrator configuration (exposed to TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorAppConfig {
    /// How far back an open ticket may be reused
    #[serde(default = "default_ticket_window")]
    pub ticket_reuse_window_hours: i64,
    /// Automation requests allowed per tenant per hour
    #[serde(default = "default_automation_max")]
    pub automation_max_per_hour: u32,
    /// Version tag stamped on processed messages
    #[serde(default = "default_processing_version")]
    pub processing_version: String,
    /// Domain event buffer
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl Default for OrchestratorAppConfig {
    fn default() -> Self {
        Self {
            ticket_reuse_window_hours: default_ticket_window(),
            automation_max_per_hour: default_automation_max(),
            processing_version: default_processing_version(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl OrchestratorAppConfig {
    /// Orchestrator settings
    #[must_use]
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_ticket_reuse_window(chrono::Duration::hours(self.ticket_reuse_window_hours))
            .with_automation_max_per_hour(self.automation_max_per_hour)
            .with_processing_version(self.processing_version.clone())
    }
}

fn default_ticket_window() -> i64 {
    6
}
fn default_automation_max() -> u32 {
    100
}
fn default_processing_version() -> String {
    "1.0".to_string()
}
fn default_event_bus_capacity() -> usize {
    1024
}

/// Provider request settings shared by all adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAppConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Attempts per send, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DeliveryAppConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_request_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    3
}

/// Cache sizes and lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_template_ttl")]
    pub template_ttl_secs: u64,
    #[serde(default = "default_username_ttl")]
    pub username_ttl_secs: u64,
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_secs: u64,
    /// Entry cap for every adapter cache
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            template_ttl_secs: default_template_ttl(),
            username_ttl_secs: default_username_ttl(),
            idempotency_ttl_secs: default_idempotency_ttl(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn template_ttl(&self) -> Duration {
        Duration::from_secs(self.template_ttl_secs)
    }

    pub fn username_ttl(&self) -> Duration {
        Duration::from_secs(self.username_ttl_secs)
    }
}

fn default_template_ttl() -> u64 {
    300
}
fn default_username_ttl() -> u64 {
    3600
}
fn default_idempotency_ttl() -> u64 {
    300
}
fn default_max_entries() -> usize {
    10_000
}

/// Per-channel switches. Credentials come from the adapters' environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: ChannelToggle,
    #[serde(default)]
    pub instagram: ChannelToggle,
    #[serde(default)]
    pub messenger: ChannelToggle,
    #[serde(default)]
    pub sms: ChannelToggle,
    #[serde(default)]
    pub email: ChannelToggle,
    #[serde(default)]
    pub web: WebChannelConfig,
}

/// Channel on/off switch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// Web chat channel config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_web_max_length")]
    pub max_message_length: usize,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for WebChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_message_length: default_web_max_length(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

fn default_web_max_length() -> usize {
    5000
}
fn default_outbox_capacity() -> usize {
    256
}

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let _ = dotenvy::dotenv();

    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("COURIER_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority), e.g. COURIER_CACHE__MAX_ENTRIES
        .add_source(
            Environment::with_prefix("COURIER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Load the embedded defaults overlaid with a TOML document
pub fn load_config_from_str(overrides: &str) -> Result<AppConfig> {
    Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::from_str(overrides, FileFormat::Toml))
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.logging.directory.is_none());
        assert_eq!(config.orchestrator.ticket_reuse_window_hours, 6);
        assert_eq!(config.orchestrator.event_bus_capacity, 1024);
        assert_eq!(config.cache.template_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.max_entries, 10_000);
        assert!(!config.channels.whatsapp.enabled);
        assert!(config.channels.web.enabled);
    }

    #[test]
    fn test_overrides_apply_per_key() {
        let config = load_config_from_str(
            r#"
            [logging]
            format = "json"

            [orchestrator]
            automation_max_per_hour = 5

            [channels.sms]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.orchestrator.automation_max_per_hour, 5);
        assert_eq!(config.orchestrator.processing_version, "1.0");
        assert!(config.channels.sms.enabled);
        assert!(config.channels.web.enabled);
    }

    #[test]
    fn test_orchestrator_config_conversion() {
        let config = OrchestratorAppConfig {
            ticket_reuse_window_hours: 12,
            ..OrchestratorAppConfig::default()
        };
        let orchestrator = config.to_orchestrator_config();
        assert_eq!(orchestrator.ticket_reuse_window, chrono::Duration::hours(12));
        assert_eq!(orchestrator.automation_max_per_hour, 100);
    }
}
