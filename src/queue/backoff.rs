use std::time::Duration;

use rand::Rng;

/// Base delay before the first retry.
const BASE_DELAY_SECS: u64 = 15;

/// Calculate the retry delay after the given failed attempt (1-based):
/// `base * 2^(n-1)` with up to +20% jitter.
pub fn retry_backoff(attempt: i32) -> Duration {
    let attempt = attempt.max(1) as u32;

    // Cap the exponent to prevent overflow (max ~4.3 hours with 15s base)
    let exponent = (attempt - 1).min(10);
    let base = BASE_DELAY_SECS.saturating_mul(2u64.saturating_pow(exponent));

    let jitter = rand::thread_rng().gen_range(0.0..0.2);
    let delay = (base as f64 * (1.0 + jitter)).round() as u64;

    Duration::from_secs(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_progression() {
        let d1 = retry_backoff(1);
        let d2 = retry_backoff(2);
        let d3 = retry_backoff(3);

        assert!(d1.as_secs() >= 15 && d1.as_secs() <= 18); // 15s +20%
        assert!(d2.as_secs() >= 30 && d2.as_secs() <= 36); // 30s +20%
        assert!(d3.as_secs() >= 60 && d3.as_secs() <= 72); // 60s +20%
    }

    #[test]
    fn backoff_exponent_is_capped() {
        let d = retry_backoff(40);
        // attempt 11+: 15 * 2^10 = 15360s, +20% jitter at most
        assert!(d.as_secs() >= 15360 && d.as_secs() <= 18432);
    }

    #[test]
    fn backoff_handles_non_positive_attempts() {
        let d = retry_backoff(0);
        assert!(d.as_secs() >= 15 && d.as_secs() <= 18);
    }
}
