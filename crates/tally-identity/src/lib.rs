//! # tally-identity
//!
//! Gives every running instance a stable, fleet-unique identifier.
//!
//! Instances that restart or scale out converge on one id per deployment by
//! racing a conditional write against a shared key/value backend. The
//! backend is optional; without one each instance keeps its local id.
//!
//! Enable the `turso` feature for a SQLite-compatible backend that several
//! processes can share through one database file.

mod backend;
mod selector;
mod supplier;
#[cfg(feature = "turso")]
mod turso_backend;

pub use backend::{KeyValueBackend, MemoryBackend};
pub use selector::{BackendSelector, PRIMARY_BACKEND_NAME};
pub use supplier::{InstanceIdSupplier, INSTANCE_ID_KEY};
#[cfg(feature = "turso")]
pub use turso_backend::TursoBackend;
