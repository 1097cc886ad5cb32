//! Persistence of sources, files, detections, and components.

pub mod component;
pub mod detection;
pub mod file;
pub mod source;
pub mod task;

use crate::Error;
use openlcs_common::retry::RetryPolicy;
use std::future::Future;

/// Run a write, retrying when it collides with a concurrent write of the same data.
///
/// Exhausting the attempts results in an [`Error::IntegrityConflict`].
pub(crate) async fn on_conflict_retry<F, Fut, T>(operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    RetryPolicy::default()
        .run(Error::is_conflict, operation)
        .await
        .map_err(Error::from_conflict)
}
