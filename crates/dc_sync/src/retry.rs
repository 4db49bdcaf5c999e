use std::{future::Future, time::Duration};

use tracing::warn;

use dc_client::RelayError;

use crate::config::RetryPolicy;

/// Runs one relay request under `timeout`. An expired request is a
/// transient `Network` failure.
pub(crate) async fn timed<T, Fut>(timeout: Duration, fut: Fut) -> Result<T, RelayError>
where
    Fut: Future<Output = Result<T, RelayError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(RelayError::Network(format!("request timed out after {timeout:?}"))),
    }
}

/// Retries transient failures up to `policy.max_attempts` total tries.
/// Non-transient errors return immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    op_name: &'static str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> Result<T, RelayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut attempt = 1u32;
    loop {
        match timed(timeout, op()).await {
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(event = "relay_retry", op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
