//! Stats collector client
//!
//! The collector accepts one JSON document per reportable event. Application
//! and execution identifiers are hashed before they leave the process.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tally_core::{ExecutionSummary, ReportableTelemetryEvent, Result, TallyError, TelemetryConfig};

const LOG_PATH: &str = "/log";

/// Trait for delivering telemetry to the collector (allows mocking in tests)
#[async_trait]
pub trait StatsService: Send + Sync {
    /// Send one event to the collector
    async fn log(&self, event: &ReportableTelemetryEvent) -> Result<()>;
}

/// HTTP client for the stats collector
#[derive(Debug, Clone)]
pub struct HttpStatsService {
    client: reqwest::Client,
    url: String,
}

impl HttpStatsService {
    /// Create a client posting to `{endpoint}/log`
    ///
    /// Every request is bounded by `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TallyError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}{}", endpoint.trim_end_matches('/'), LOG_PATH),
        })
    }

    /// Create a client from telemetry configuration
    pub fn from_config(config: &TelemetryConfig) -> Result<Self> {
        tracing::info!("Telemetry service loaded ({})", config.endpoint);
        Self::new(&config.endpoint, Duration::from_millis(config.request_timeout_ms))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StatsService for HttpStatsService {
    async fn log(&self, event: &ReportableTelemetryEvent) -> Result<()> {
        let payload = StatsEvent::from(event);

        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| TallyError::Network(format!("Failed to send telemetry: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(TallyError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// JSON body accepted by the collector
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsEvent {
    pub instance: InstanceInfo,
    pub application: ApplicationInfo,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub id: String,
    pub version: String,
    pub deployment_method: DeploymentMethodInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentMethodInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationInfo {
    /// SHA-256 of the application name
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionInfo {
    /// SHA-256 of the execution id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub trigger: TriggerInfo,
    pub stages: Vec<StageInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerInfo {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
}

impl From<&ReportableTelemetryEvent> for StatsEvent {
    fn from(event: &ReportableTelemetryEvent) -> Self {
        Self {
            instance: InstanceInfo {
                id: event.instance_id.clone(),
                version: event.service_version.clone(),
                deployment_method: DeploymentMethodInfo {
                    kind: event.deployment_method.kind.clone(),
                    version: event.deployment_method.version.clone(),
                },
            },
            application: ApplicationInfo {
                id: hash(&event.application_id),
            },
            event_type: event.event_type.clone(),
            execution: event.execution.as_ref().map(ExecutionInfo::from),
        }
    }
}

impl From<&ExecutionSummary> for ExecutionInfo {
    fn from(execution: &ExecutionSummary) -> Self {
        Self {
            id: execution.id.as_deref().map(hash),
            kind: execution.execution_type.clone(),
            status: execution.status.clone(),
            trigger: TriggerInfo {
                kind: execution.trigger_type.clone(),
            },
            stages: execution
                .stages
                .iter()
                .map(|stage| StageInfo {
                    kind: stage.stage_type.clone(),
                    status: stage.status.clone(),
                })
                .collect(),
        }
    }
}

/// Hex-encoded SHA-256 of `clear_text`
pub fn hash(clear_text: &str) -> String {
    hex::encode(Sha256::digest(clear_text.as_bytes()))
}
