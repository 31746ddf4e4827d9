use rand::Rng;
use std::time::Duration;

/// Jittered backoff window for a single media-plane 5xx retry (§4.3: one
/// retry, 250ms-2s jittered).
pub fn single_retry_delay(base: Duration, cap: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    let mut rng = rand::thread_rng();
    let jittered = rng.gen_range(base_ms..=cap_ms);
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_within_bounds() {
        let d = single_retry_delay(Duration::from_millis(250), Duration::from_millis(2000));
        assert!(d >= Duration::from_millis(250));
        assert!(d <= Duration::from_millis(2000));
    }
}
