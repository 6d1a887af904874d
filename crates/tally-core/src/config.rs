//! Configuration management for Tally
//!
//! Telemetry settings, circuit breaker thresholds and the coordination store
//! are loaded from a single TOML file. Every field has a default, so an empty
//! or missing file yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{DeploymentMethod, Result, TallyError};

pub const DEFAULT_TELEMETRY_ENDPOINT: &str = "https://stats.spinnaker.io";

/// Telemetry configuration
///
/// Typically loaded from `tally.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Telemetry is on unless explicitly disabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Base URL of the stats collector
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Local candidate for the instance identifier
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Version of the host service
    #[serde(default = "default_service_version")]
    pub service_version: String,

    /// How the host service was deployed
    #[serde(default)]
    pub deployment_method: DeploymentMethod,

    /// Event types worth reporting
    #[serde(default = "default_reportable_event_types")]
    pub reportable_event_types: Vec<String>,

    /// Upper bound for one collector request
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Circuit breaker guarding the collector
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Shared store used to agree on the instance identifier
    #[serde(default)]
    pub coordination: CoordinationConfig,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100) at which the breaker opens
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f32,

    /// Number of most recent calls considered in CLOSED state
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: u32,

    /// Calls required before the failure rate is evaluated
    #[serde(default = "default_minimum_number_of_calls")]
    pub minimum_number_of_calls: u32,

    /// Trial calls allowed through in HALF_OPEN state
    #[serde(default = "default_permitted_calls_in_half_open_state")]
    pub permitted_calls_in_half_open_state: u32,

    /// Cool-down before an OPEN breaker lets trial calls through
    #[serde(default = "default_wait_duration_in_open_state_ms")]
    pub wait_duration_in_open_state_ms: u64,
}

/// Which coordination backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackendKind {
    /// No shared store, the local candidate is used as-is
    #[default]
    None,
    /// Process-local map (single host, tests)
    Memory,
    /// SQLite-compatible database file shared by the fleet
    Turso,
}

/// Coordination store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub backend: CoordinationBackendKind,

    /// Database path for the turso backend
    #[serde(default)]
    pub path: Option<String>,

    /// Upper bound for one coordination call
    #[serde(default = "default_coordination_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value providers
fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    DEFAULT_TELEMETRY_ENDPOINT.to_string()
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_service_version() -> String {
    "unknown".to_string()
}

fn default_reportable_event_types() -> Vec<String> {
    vec![
        "orca:orchestration:complete".to_string(),
        "orca:orchestration:failed".to_string(),
        "orca:pipeline:complete".to_string(),
        "orca:pipeline:failed".to_string(),
    ]
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_failure_rate_threshold() -> f32 {
    50.0
}

fn default_sliding_window_size() -> u32 {
    20
}

fn default_minimum_number_of_calls() -> u32 {
    10
}

fn default_permitted_calls_in_half_open_state() -> u32 {
    3
}

fn default_wait_duration_in_open_state_ms() -> u64 {
    30_000
}

fn default_coordination_timeout_ms() -> u64 {
    2_000
}

impl TelemetryConfig {
    /// Load configuration from `path` or use defaults if the file is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)
                .map_err(|e| TallyError::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.circuit_breaker.validate()?;

        // An explicitly empty id must never become the instance identity
        if config.instance_id.trim().is_empty() {
            config.instance_id = default_instance_id();
        }

        Ok(config)
    }

    /// Write the default configuration to `path`
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| TallyError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Set the local instance id candidate
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }
}

impl CircuitBreakerConfig {
    /// Reject thresholds the breaker cannot act on
    ///
    /// The failure rate must lie in (0, 100] and the sliding window must hold
    /// at least one call.
    pub fn validate(&self) -> Result<()> {
        let rate = self.failure_rate_threshold;
        if !(rate > 0.0 && rate <= 100.0) {
            return Err(TallyError::Config(format!(
                "circuit_breaker.failure_rate_threshold must be in (0, 100], got {}",
                rate
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(TallyError::Config(
                "circuit_breaker.sliding_window_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            instance_id: default_instance_id(),
            service_version: default_service_version(),
            deployment_method: DeploymentMethod::default(),
            reportable_event_types: default_reportable_event_types(),
            request_timeout_ms: default_request_timeout_ms(),
            circuit_breaker: CircuitBreakerConfig::default(),
            coordination: CoordinationConfig::default(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            sliding_window_size: default_sliding_window_size(),
            minimum_number_of_calls: default_minimum_number_of_calls(),
            permitted_calls_in_half_open_state: default_permitted_calls_in_half_open_state(),
            wait_duration_in_open_state_ms: default_wait_duration_in_open_state_ms(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: CoordinationBackendKind::default(),
            path: None,
            timeout_ms: default_coordination_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.endpoint, DEFAULT_TELEMETRY_ENDPOINT);
        assert_eq!(config.service_version, "unknown");
        assert!(!config.instance_id.is_empty());
        assert!(config.deployment_method.kind.is_none());
        assert!(config.deployment_method.version.is_none());
        assert_eq!(config.reportable_event_types.len(), 4);
        assert_eq!(config.coordination.backend, CoordinationBackendKind::None);
    }

    #[test]
    fn test_default_instance_ids_differ() {
        let a = TelemetryConfig::default();
        let b = TelemetryConfig::default();
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = TelemetryConfig::load_or_default(&dir.path().join("tally.toml")).unwrap();
        assert!(config.enabled);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(
            &path,
            r#"
enabled = false
instance_id = "my-id"
service_version = "1.2.3"

[deployment_method]
type = "helm"
version = "3.1"

[circuit_breaker]
wait_duration_in_open_state_ms = 1000

[coordination]
backend = "memory"
"#,
        )
        .unwrap();

        let config = TelemetryConfig::load_or_default(&path).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.instance_id, "my-id");
        assert_eq!(config.service_version, "1.2.3");
        assert_eq!(config.deployment_method, DeploymentMethod::new("helm", "3.1"));
        assert_eq!(config.circuit_breaker.wait_duration_in_open_state_ms, 1000);
        assert_eq!(config.circuit_breaker.sliding_window_size, 20);
        assert_eq!(config.coordination.backend, CoordinationBackendKind::Memory);
        assert_eq!(config.endpoint, DEFAULT_TELEMETRY_ENDPOINT);
    }

    #[test]
    fn test_empty_instance_id_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "instance_id = \"\"\n").unwrap();

        let config = TelemetryConfig::load_or_default(&path).unwrap();
        assert!(!config.instance_id.is_empty());
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");
        std::fs::write(&path, "enabled = \"sometimes\"").unwrap();

        let err = TelemetryConfig::load_or_default(&path).unwrap_err();
        assert!(matches!(err, TallyError::Config(_)));
    }

    #[test]
    fn test_failure_rate_out_of_range_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");

        for rate in ["0.0", "-5.0", "100.5", "250.0"] {
            std::fs::write(
                &path,
                format!("[circuit_breaker]\nfailure_rate_threshold = {}\n", rate),
            )
            .unwrap();

            let err = TelemetryConfig::load_or_default(&path).unwrap_err();
            assert!(matches!(err, TallyError::Config(_)), "rate {} accepted", rate);
        }
    }

    #[test]
    fn test_failure_rate_bounds_are_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");

        for rate in ["0.5", "100.0"] {
            std::fs::write(
                &path,
                format!("[circuit_breaker]\nfailure_rate_threshold = {}\n", rate),
            )
            .unwrap();
            assert!(TelemetryConfig::load_or_default(&path).is_ok());
        }
    }

    #[test]
    fn test_empty_sliding_window_is_rejected() {
        let config = CircuitBreakerConfig {
            sliding_window_size: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(matches!(config.validate(), Err(TallyError::Config(_))));
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("tally.toml");
        TelemetryConfig::write_default(&path).unwrap();

        let config = TelemetryConfig::load_or_default(&path).unwrap();
        assert!(config.enabled);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
    }
}
