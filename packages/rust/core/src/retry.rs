//! Bounded exponential-backoff retries for collaborator calls.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use digestkit_shared::GenerationError;
use tracing::warn;

/// How many times to retry and how long to wait first.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial: Duration,
}

/// Run `op`, retrying transient failures up to `policy.max_retries` times.
///
/// Permanent and unreachable errors are returned immediately. After the
/// last retry the final transient error is returned.
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    what: &'static str,
    mut op: F,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    retry(backoff, || {
        attempt += 1;
        let n = attempt;
        let fut = op();
        async move {
            match fut.await {
                Ok(v) => Ok(v),
                Err(e) if e.is_transient() && n <= policy.max_retries => {
                    warn!(what, attempt = n, error = %e, "transient failure, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}
