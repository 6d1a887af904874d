//! Fail-open utilities for graceful degradation
//!
//! Telemetry is infrastructure: when it breaks, the host keeps running.
//! Use these helpers for coordination-store lookups and collector calls,
//! never for anything the host depends on for correctness.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::warn;

use crate::{Result, TallyError};

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use tally_core::fail_open::fail_open;
/// use tally_core::Result;
///
/// async fn read_shared_id() -> Result<String> {
///     Ok("01H...".to_string())
/// }
///
/// async fn example() {
///     let id = fail_open("instance_id_lookup", || read_shared_id()).await;
///     // id is None if the lookup failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Await a future, turning a panic inside it into [`TallyError::Unexpected`]
///
/// The panic is contained to the future; the caller sees an ordinary error.
pub async fn catch_fault<Fut, T>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(TallyError::Unexpected(panic_message(panic.as_ref()))),
    }
}

/// Best-effort text for a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
