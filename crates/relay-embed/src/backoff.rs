use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::provider::EmbedError;

const BASE: Duration = Duration::from_millis(250);
const CAP: Duration = Duration::from_secs(4);
const MAX_ATTEMPTS: u32 = 4;

/// Jittered exponential backoff on 429/5xx for embedding/rerank calls.
pub async fn retry_with_backoff<F, Fut, T>(mut attempt: F) -> Result<T, EmbedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EmbedError>>,
{
    let mut last_err = None;
    for attempt_no in 0..MAX_ATTEMPTS {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt_no + 1 < MAX_ATTEMPTS => {
                let delay = backoff_delay(attempt_no);
                warn!(attempt = attempt_no + 1, delay_ms = delay.as_millis(), "embed call failed, retrying: {e}");
                tokio::time::sleep(delay).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("loop always attempts at least once"))
}

fn backoff_delay(attempt_no: u32) -> Duration {
    let exp_ms = BASE.as_millis() as u64 * 2u64.pow(attempt_no);
    let capped_ms = exp_ms.min(CAP.as_millis() as u64);
    let jittered = rand::thread_rng().gen_range((capped_ms / 2).max(1)..=capped_ms);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_call_ok() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, EmbedError> = retry_with_backoff(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_on_persistent_5xx() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, EmbedError> = retry_with_backoff(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EmbedError::Api {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, EmbedError> = retry_with_backoff(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(EmbedError::Api {
                    status: 400,
                    message: "bad request".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
