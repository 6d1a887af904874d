//! Reportability filter
//!
//! Runs on every event the host delivers, so it does no I/O and allocates
//! only once an event is known to be reportable.

use std::collections::HashSet;
use std::fmt;

use tally_core::{DeploymentMethod, Event, ExecutionSummary, ReportableTelemetryEvent, TelemetryConfig};

/// Why an event was not reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRejection {
    MissingDetails,
    MissingContent,
    MissingType,
    UnreportableType,
    MissingApplication,
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRejection::MissingDetails => write!(f, "details not found in event"),
            FilterRejection::MissingContent => write!(f, "content not found in event"),
            FilterRejection::MissingType => write!(f, "event has no type"),
            FilterRejection::UnreportableType => write!(f, "type not whitelisted"),
            FilterRejection::MissingApplication => write!(f, "application id must be non-empty"),
        }
    }
}

/// Decides which events are reportable and builds their payload
#[derive(Debug, Clone)]
pub struct EventFilter {
    reportable_types: HashSet<String>,
    instance_id: String,
    deployment_method: DeploymentMethod,
    service_version: String,
}

impl EventFilter {
    pub fn new(
        reportable_types: impl IntoIterator<Item = String>,
        instance_id: impl Into<String>,
        deployment_method: DeploymentMethod,
        service_version: impl Into<String>,
    ) -> Self {
        Self {
            reportable_types: reportable_types.into_iter().collect(),
            instance_id: instance_id.into(),
            deployment_method,
            service_version: service_version.into(),
        }
    }

    /// Build a filter from configuration and the resolved instance id
    pub fn from_config(config: &TelemetryConfig, instance_id: impl Into<String>) -> Self {
        Self::new(
            config.reportable_event_types.iter().cloned(),
            instance_id,
            config.deployment_method.clone(),
            config.service_version.clone(),
        )
    }

    /// Check an event and extract its reportable payload
    ///
    /// Checks run in a fixed order and the first failing one decides.
    pub fn evaluate(&self, event: &Event) -> Result<ReportableTelemetryEvent, FilterRejection> {
        let details = event.details.as_ref().ok_or(FilterRejection::MissingDetails)?;
        let content = event.content.as_ref().ok_or(FilterRejection::MissingContent)?;

        let event_type = details.event_type.as_deref().ok_or(FilterRejection::MissingType)?;
        if !self.reportable_types.contains(event_type) {
            return Err(FilterRejection::UnreportableType);
        }

        let application_id = details
            .application
            .as_deref()
            .filter(|app| !app.is_empty())
            .ok_or(FilterRejection::MissingApplication)?;

        Ok(ReportableTelemetryEvent {
            event_type: event_type.to_string(),
            application_id: application_id.to_string(),
            instance_id: self.instance_id.clone(),
            deployment_method: self.deployment_method.clone(),
            service_version: self.service_version.clone(),
            execution: content.get("execution").and_then(ExecutionSummary::from_value),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
