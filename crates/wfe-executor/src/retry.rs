use rand::Rng;

/// `backoff = min(base * 2^(attempt-1), max) * (1 +/- jitter_fraction)`.
/// `attempt` is the attempt number just completed (1-based).
pub fn backoff_ms(attempt: u32, base_ms: u64, max_ms: u64, jitter_fraction: f64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    let raw = (base_ms as u128) * (1u128 << exponent);
    let base = raw.min(max_ms as u128) as f64;
    let jitter = rand::thread_rng().gen_range(-jitter_fraction..=jitter_fraction);
    (base * (1.0 + jitter)).max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfe_types::limits::{BACKOFF_BASE_MS, BACKOFF_MAX_MS, JITTER_FRACTION};

    #[test]
    fn backoff_stays_within_jitter_band_of_the_doubling_series() {
        for attempt in 1..=8 {
            let raw = (BACKOFF_BASE_MS as u128) * (1u128 << (attempt - 1));
            let expected_base = raw.min(BACKOFF_MAX_MS as u128) as f64;
            let lower = (expected_base * (1.0 - JITTER_FRACTION)).floor() as u64;
            let upper = (expected_base * (1.0 + JITTER_FRACTION)).ceil() as u64;
            for _ in 0..20 {
                let got = backoff_ms(attempt, BACKOFF_BASE_MS, BACKOFF_MAX_MS, JITTER_FRACTION);
                assert!(got >= lower && got <= upper, "attempt {attempt}: {got} not in [{lower},{upper}]");
            }
        }
    }

    #[test]
    fn backoff_is_capped_at_max_for_large_attempts() {
        let got = backoff_ms(20, BACKOFF_BASE_MS, BACKOFF_MAX_MS, JITTER_FRACTION);
        assert!(got <= (BACKOFF_MAX_MS as f64 * (1.0 + JITTER_FRACTION)) as u64);
    }
}
