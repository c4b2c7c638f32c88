//! Exponential backoff between failed iterations.

use std::time::Duration;

const BASE_SECS: u64 = 5;
const MAX_SECS: u64 = 60;

/// `min(base * 2^(k-1), max)` for the `k`th consecutive failure (`k >= 1`).
pub fn backoff_for(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    let secs = BASE_SECS.saturating_mul(1u64 << exponent).min(MAX_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_is_base() {
        assert_eq!(backoff_for(1), Duration::from_secs(5));
    }

    #[test]
    fn doubles_each_failure() {
        assert_eq!(backoff_for(2), Duration::from_secs(10));
        assert_eq!(backoff_for(3), Duration::from_secs(20));
    }

    #[test]
    fn caps_at_max() {
        assert_eq!(backoff_for(10), Duration::from_secs(60));
    }
}
