//! Configuration for the refnet engine.
//!
//! Maps directly to `refnet.toml`; every field has a default so a missing
//! file or empty section yields a working configuration.

use serde::{Deserialize, Serialize};

/// Top-level refnet configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefnetConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Name-matching behavior.
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Period-cache persistence settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Telemetry & observability.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RefnetConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `RefnetError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::RefnetError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the analytics engine is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

/// Name-matching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Whether a bare first name may resolve when exactly one member
    /// carries it. Disable for chapters where bare first names are
    /// considered too risky to credit.
    #[serde(default = "default_true")]
    pub first_name_fallback: bool,
    /// Cap on per-batch warnings emitted to the log (the full warning list
    /// is always returned to the caller).
    #[serde(default = "default_25")]
    pub max_warnings_logged: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            first_name_fallback: true,
            max_warnings_logged: 25,
        }
    }
}

/// Period-cache persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads during imports.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Detect cache corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Number of rotating backups to keep.
    #[serde(default = "default_3")]
    pub backup_count: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            checksum_enabled: true,
            backup_count: 3,
        }
    }
}

/// Telemetry and observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Opt-in only.
    #[serde(default)]
    pub enabled: bool,
    /// Prometheus metrics endpoint.
    #[serde(default = "default_prom_endpoint")]
    pub prometheus_endpoint: String,
    /// Log any batch exceeding this threshold (ms).
    #[serde(default = "default_250_0")]
    pub log_slow_operations_ms: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prometheus_endpoint: "127.0.0.1:9090".to_string(),
            log_slow_operations_ms: 250.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_prom_endpoint() -> String { "127.0.0.1:9090".to_string() }
fn default_3() -> u32 { 3 }
fn default_25() -> usize { 25 }
fn default_250_0() -> f64 { 250.0 }
