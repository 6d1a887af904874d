//! Backend selection
//!
//! A deployment may configure any number of coordination backends,
//! including none at all. Callers ask for the primary and treat `None` as
//! "no coordination available".

use std::sync::Arc;

use tally_core::{CoordinationBackendKind, CoordinationConfig};
use tracing::warn;

use crate::backend::{KeyValueBackend, MemoryBackend};

/// Name of the backend preferred as primary
pub const PRIMARY_BACKEND_NAME: &str = "primaryDefault";

/// Zero or more named coordination backends
#[derive(Clone, Default)]
pub struct BackendSelector {
    backends: Vec<Arc<dyn KeyValueBackend>>,
}

impl BackendSelector {
    pub fn new(backends: Vec<Arc<dyn KeyValueBackend>>) -> Self {
        Self { backends }
    }

    /// A selector with no backends
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the selector described by `config`
    ///
    /// A backend that cannot be opened is left out with a warning, so the
    /// result may be empty even when a backend was configured.
    pub async fn from_config(config: &CoordinationConfig) -> Self {
        match config.backend {
            CoordinationBackendKind::None => Self::empty(),
            CoordinationBackendKind::Memory => {
                Self::new(vec![Arc::new(MemoryBackend::new(PRIMARY_BACKEND_NAME))])
            }
            CoordinationBackendKind::Turso => Self::open_turso(config).await,
        }
    }

    #[cfg(feature = "turso")]
    async fn open_turso(config: &CoordinationConfig) -> Self {
        let path = config
            .path
            .clone()
            .unwrap_or_else(|| ".tally/coordination.db".to_string());

        match crate::turso_backend::TursoBackend::open(PRIMARY_BACKEND_NAME, &path).await {
            Ok(backend) => {
                tracing::info!("Coordination store opened at {}", path);
                Self::new(vec![Arc::new(backend)])
            }
            Err(e) => {
                warn!("Coordination store unavailable at {}: {}", path, e);
                Self::empty()
            }
        }
    }

    #[cfg(not(feature = "turso"))]
    async fn open_turso(_config: &CoordinationConfig) -> Self {
        warn!("Coordination backend 'turso' requested but the turso feature is not enabled");
        Self::empty()
    }

    /// The primary backend: `primaryDefault` if present, otherwise the first one
    pub fn primary(&self) -> Option<Arc<dyn KeyValueBackend>> {
        self.backends
            .iter()
            .find(|b| b.name() == PRIMARY_BACKEND_NAME)
            .or_else(|| self.backends.first())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BackendSelector").field("backends", &names).finish()
    }
}
