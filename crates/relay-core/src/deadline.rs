use std::future::Future;
use std::time::Duration;

/// Run `fut` against a soft deadline. On expiry, returns `None` instead of
/// an error — per §4.5.2, a timed-out stage contributes an empty result
/// and the pipeline continues; it is never a hard failure.
pub async fn soft_deadline<F, T>(ms: u64, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(Duration::from_millis(ms), fut)
        .await
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_some_when_future_completes_in_time() {
        let got = soft_deadline(50, async { 7 }).await;
        assert_eq!(got, Some(7));
    }

    #[tokio::test]
    async fn returns_none_on_timeout() {
        let got = soft_deadline(5, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            7
        })
        .await;
        assert_eq!(got, None);
    }
}
