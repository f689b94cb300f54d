use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use crate::error::DeliveryError;
use crate::monitor::TriggerMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub connections: ConnectionLimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted HTTP request body in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// Process memory ceiling and pressure classification
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_limit")]
    pub limit_bytes: u64,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
    /// Usage must fall this far below a threshold before the band re-arms
    #[serde(default = "default_recovery_margin")]
    pub recovery_margin: f64,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,
    #[serde(default = "default_sample_history")]
    pub sample_history_size: usize,
    #[serde(default = "default_reclaim_history")]
    pub reclaim_history_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_max_size")]
    pub max_size_bytes: usize,
    #[serde(default = "default_buffer_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_true")]
    pub compression_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between send batches in milliseconds
    #[serde(default = "default_batch_pause")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// New connections are refused at or above this share of the memory limit
    #[serde(default = "default_admission_ratio")]
    pub admission_ratio: f64,
    /// Cleanup cycles reclaim proactively above this share of the memory limit
    #[serde(default = "default_preventive_reclaim_ratio")]
    pub preventive_reclaim_ratio: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConnectionLimitsConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_memory_limit() -> u64 {
    512 * 1024 * 1024 // 512 MiB
}

fn default_warning_threshold() -> f64 {
    0.80
}

fn default_critical_threshold() -> f64 {
    0.95
}

fn default_recovery_margin() -> f64 {
    0.05
}

fn default_check_interval() -> u64 {
    30
}

fn default_sample_history() -> usize {
    100
}

fn default_reclaim_history() -> usize {
    50
}

fn default_buffer_max_size() -> usize {
    50 * 1024 * 1024 // 50 MiB
}

fn default_buffer_max_messages() -> usize {
    10_000
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_pause() -> u64 {
    10
}

fn default_send_timeout() -> u64 {
    5000
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_admission_ratio() -> f64 {
    0.9
}

fn default_preventive_reclaim_ratio() -> f64 {
    0.7
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_connections_per_user() -> usize {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "realtime-delivery-core".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, DeliveryError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let settings: Settings = Self::builder(&run_mode)?.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn builder(
        run_mode: &str,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Ok(Config::builder()
            // Start with default values; remaining fields fall back to serde defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("memory.warning_threshold", default_warning_threshold())?
            .set_default("memory.critical_threshold", default_critical_threshold())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // RTD__MEMORY__LIMIT_BYTES, RTD__BROADCAST__BATCH_SIZE, etc.
            .add_source(
                Environment::with_prefix("RTD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            ))
    }

    /// Check every section whose values the runtime cannot clamp sensibly
    pub fn validate(&self) -> Result<(), DeliveryError> {
        self.memory.validate()?;
        self.broadcast.validate()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl MemoryConfig {
    /// Require `0 < warning < critical <= 1` and a margin that keeps the
    /// recovery point above zero.
    pub fn validate(&self) -> Result<(), DeliveryError> {
        require_nonzero_interval("memory.check_interval_seconds", self.check_interval_seconds)?;
        validate_thresholds(
            self.warning_threshold,
            self.critical_threshold,
            self.recovery_margin,
        )
    }
}

impl BroadcastConfig {
    pub fn validate(&self) -> Result<(), DeliveryError> {
        require_nonzero_interval(
            "broadcast.cleanup_interval_seconds",
            self.cleanup_interval_seconds,
        )?;
        if self.batch_size == 0 {
            return Err(invalid("broadcast.batch_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn require_nonzero_interval(key: &str, seconds: u64) -> Result<(), DeliveryError> {
    if seconds == 0 {
        return Err(invalid(format!("{} must be at least 1 second", key)));
    }
    Ok(())
}

fn invalid(message: String) -> DeliveryError {
    DeliveryError::Config(ConfigError::Message(message))
}

pub fn validate_thresholds(
    warning: f64,
    critical: f64,
    recovery_margin: f64,
) -> Result<(), DeliveryError> {
    let valid = warning > 0.0
        && warning < critical
        && critical <= 1.0
        && (0.0..warning).contains(&recovery_margin);

    if valid {
        Ok(())
    } else {
        Err(DeliveryError::InvalidThresholds {
            warning,
            critical,
            recovery_margin,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            limit_bytes: default_memory_limit(),
            warning_threshold: default_warning_threshold(),
            critical_threshold: default_critical_threshold(),
            recovery_margin: default_recovery_margin(),
            trigger_mode: TriggerMode::default(),
            check_interval_seconds: default_check_interval(),
            sample_history_size: default_sample_history(),
            reclaim_history_size: default_reclaim_history(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_buffer_max_size(),
            max_messages: default_buffer_max_messages(),
            compression_threshold_bytes: default_compression_threshold(),
            compression_enabled: true,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause(),
            send_timeout_ms: default_send_timeout(),
            cleanup_interval_seconds: default_cleanup_interval(),
            admission_ratio: default_admission_ratio(),
            preventive_reclaim_ratio: default_preventive_reclaim_ratio(),
        }
    }
}

impl Default for ConnectionLimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_connections_per_user: default_max_connections_per_user(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
