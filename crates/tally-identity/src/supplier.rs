//! Fleet-unique instance identity
//!
//! Every instance starts with a local candidate id. When a coordination
//! backend is reachable, the first instance to publish its candidate wins and
//! every other instance (including those that lose a simultaneous race)
//! adopts the published value. Without coordination the local candidate is
//! used as-is.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tally_core::fail_open::{catch_fault, fail_open};
use tally_core::{Result, TallyError, TelemetryConfig};
use tracing::{debug, info};

use crate::backend::KeyValueBackend;
use crate::selector::BackendSelector;

/// Key of the fleet's shared instance-identity slot
pub const INSTANCE_ID_KEY: &str = "tally:stats:instance-id";

/// The resolved instance identifier
///
/// Resolved once at construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdSupplier {
    unique_id: Arc<str>,
}

impl InstanceIdSupplier {
    /// Resolve the instance id from `config` and an optional coordination store
    ///
    /// Never fails: an absent, empty, unreachable or panicking store leaves
    /// the local candidate in place.
    pub async fn resolve(config: &TelemetryConfig, selector: Option<&BackendSelector>) -> Self {
        let candidate = local_candidate(config);
        let timeout = Duration::from_millis(config.coordination.timeout_ms);

        let Some(backend) = selector.and_then(BackendSelector::primary) else {
            debug!("No coordination backend, using local instance id");
            return Self::from_candidate(candidate);
        };

        let unique_id = fail_open("instance_id_coordination", || {
            catch_fault(negotiate(backend, &candidate, timeout))
        })
        .await
        .unwrap_or_else(|| candidate.clone());

        if unique_id != candidate {
            info!("Adopted fleet instance id from coordination store");
        }
        Self::from_candidate(unique_id)
    }

    /// Use the local candidate without consulting any store
    pub fn local(config: &TelemetryConfig) -> Self {
        Self::from_candidate(local_candidate(config))
    }

    fn from_candidate(unique_id: String) -> Self {
        Self {
            unique_id: Arc::from(unique_id),
        }
    }

    /// The resolved instance id
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }
}

fn local_candidate(config: &TelemetryConfig) -> String {
    let configured = config.instance_id.trim();
    if configured.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        configured.to_string()
    }
}

/// Read the published id, or publish ours and re-read on a lost race
async fn negotiate(
    backend: Arc<dyn KeyValueBackend>,
    candidate: &str,
    timeout: Duration,
) -> Result<String> {
    if let Some(existing) = bounded(timeout, backend.get(INSTANCE_ID_KEY)).await? {
        return Ok(existing);
    }

    if bounded(timeout, backend.set_if_absent(INSTANCE_ID_KEY, candidate)).await? {
        debug!("Published instance id to '{}'", backend.name());
        return Ok(candidate.to_string());
    }

    // Another instance won between our read and our write
    bounded(timeout, backend.get(INSTANCE_ID_KEY))
        .await?
        .ok_or_else(|| {
            TallyError::Coordination("instance id missing after a rejected conditional write".to_string())
        })
}

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| TallyError::CoordinationTimeout(timeout.as_millis() as u64))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_uses_configured_id() {
        let config = TelemetryConfig::default().with_instance_id("my-id");
        assert_eq!(InstanceIdSupplier::local(&config).unique_id(), "my-id");
    }

    #[test]
    fn test_blank_candidate_is_generated() {
        let config = TelemetryConfig::default().with_instance_id("   ");
        let supplier = InstanceIdSupplier::local(&config);
        assert!(!supplier.unique_id().trim().is_empty());
        assert!(uuid::Uuid::parse_str(supplier.unique_id()).is_ok());
    }
}
