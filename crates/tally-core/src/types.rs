//! Domain events and telemetry payload types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder used when an execution field is missing from the event
pub const UNKNOWN: &str = "UNKNOWN";

// ============================================================================
// Domain events (owned by the host bus, read-only here)
// ============================================================================

/// A domain event delivered by the host event bus
///
/// Only `details` and `content` are read by Tally. Either may be absent on
/// malformed or partial events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub details: Option<Metadata>,

    #[serde(default)]
    pub content: Option<Map<String, Value>>,
}

impl Event {
    pub fn new(details: Metadata, content: Map<String, Value>) -> Self {
        Self {
            details: Some(details),
            content: Some(content),
        }
    }
}

/// Event metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Emitting subsystem (e.g. "orca")
    #[serde(default)]
    pub source: Option<String>,

    /// Event type, e.g. `orca:pipeline:complete`
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,

    /// Application the event belongs to
    #[serde(default)]
    pub application: Option<String>,
}

impl Metadata {
    pub fn new(event_type: impl Into<String>, application: impl Into<String>) -> Self {
        Self {
            source: None,
            event_type: Some(event_type.into()),
            application: Some(application.into()),
        }
    }
}

// ============================================================================
// Reportable payload
// ============================================================================

/// How the host service was deployed (both parts optional)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMethod {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default)]
    pub version: Option<String>,
}

impl DeploymentMethod {
    pub fn new(kind: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            version: Some(version.into()),
        }
    }
}

/// Summary of one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage_type: String,
    pub status: String,
}

/// Summary of the execution carried in `content.execution`
///
/// Type and status strings are upper-cased; missing values become
/// [`UNKNOWN`]. The id is kept in clear text here and hashed on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Option<String>,
    pub execution_type: String,
    pub status: String,
    pub trigger_type: String,
    pub stages: Vec<StageSummary>,
}

impl ExecutionSummary {
    /// Extract a summary from an execution object
    ///
    /// Returns `None` when the value is not an object or is empty.
    pub fn from_value(execution: &Value) -> Option<Self> {
        let execution = execution.as_object().filter(|e| !e.is_empty())?;

        let stages = execution
            .get("stages")
            .and_then(Value::as_array)
            .map(|stages| {
                stages
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|stage| StageSummary {
                        stage_type: string_field(stage, "type").unwrap_or_else(|| "unknown".to_string()),
                        status: upper_field(stage, "status"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let trigger_type = execution
            .get("trigger")
            .and_then(Value::as_object)
            .map(|trigger| upper_field(trigger, "type"))
            .unwrap_or_else(|| UNKNOWN.to_string());

        Some(Self {
            id: string_field(execution, "id").filter(|id| !id.is_empty()),
            execution_type: upper_field(execution, "type"),
            status: upper_field(execution, "status"),
            trigger_type,
            stages,
        })
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn upper_field(map: &Map<String, Value>, key: &str) -> String {
    string_field(map, key)
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// A domain event that passed filtering, ready for the collector
///
/// Built fresh for every dispatch and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportableTelemetryEvent {
    pub event_type: String,
    pub application_id: String,
    pub instance_id: String,
    pub deployment_method: DeploymentMethod,
    pub service_version: String,
    pub execution: Option<ExecutionSummary>,
}
