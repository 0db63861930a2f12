//! Fixed-interval retry with cancellation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Call `operation` until it succeeds or `cancel` fires.
///
/// Each failure is logged with `label` and the attempt number, then the next
/// attempt starts after `interval`. There is no attempt limit. Returns `None`
/// once cancelled, including when an attempt finished after cancellation.
pub async fn invoke_with_retry<T, E, F, Fut>(
    mut operation: F,
    interval: Duration,
    label: &str,
    cancel: &CancellationToken,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(operation = label, attempt, "Retry loop cancelled during attempt");
                return None;
            }
            result = operation() => result,
        };

        if cancel.is_cancelled() {
            debug!(operation = label, attempt, "Discarding result completed after cancellation");
            return None;
        }

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = label, attempt, "Operation succeeded after retry");
                }
                return Some(value);
            }
            Err(e) => {
                warn!(
                    operation = label,
                    attempt,
                    error = %e,
                    retry_in_ms = interval.as_millis() as u64,
                    "{} failed (attempt {}), retrying",
                    label,
                    attempt
                );
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
