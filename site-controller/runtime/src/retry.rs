use anyhow::Result;
use site_controller_core::Error;
use site_controller_k8s_api as k8s;
use std::future::Future;
use tokio::time;

const CONFLICT_BACKOFF: time::Duration = time::Duration::from_millis(10);

/// Runs a read-modify-write `operation` until it completes without conflicting with a concurrent
/// writer.
///
/// Each attempt must re-read the object it writes. An attempt conflicts when it fails with a
/// [`k8s::Error`] carrying HTTP 409; any other failure is returned immediately. After `attempts`
/// conflicts the operation fails with [`Error::ConflictExceeded`].
pub async fn retry_on_conflict<F, Fut, T>(attempts: usize, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if is_conflict(&error) => {
                tracing::debug!(attempt, attempts, "Update conflicted");
                if attempt < attempts {
                    time::sleep(CONFLICT_BACKOFF).await;
                }
            }
            Err(error) => return Err(error),
        }
    }
    Err(Error::ConflictExceeded { attempts }.into())
}

fn is_conflict(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<k8s::Error>()
        .map_or(false, k8s::is_conflict)
}

#[cfg(test)]
pub(crate) fn conflict() -> anyhow::Error {
    k8s::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "the object has been modified".to_string(),
        reason: "Conflict".to_string(),
        code: 409,
    })
    .into()
}
