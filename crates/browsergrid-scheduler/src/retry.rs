//! Exponential backoff with jitter for task redelivery (spec.md §4.5
//! "Retries use exponential backoff with jitter").

use std::time::Duration;

use rand::Rng;

const BASE: Duration = Duration::from_millis(500);
const MAX: Duration = Duration::from_secs(30);

/// `min(BASE * 2^attempt, MAX)`, jittered by a uniform random factor in
/// `[0.5, 1.0]` so a burst of simultaneously-failing tasks doesn't
/// retry in lockstep.
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    let exp = BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(MAX);
    let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(jitter_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_attempt_and_is_capped() {
        assert!(backoff(0) <= BASE);
        assert!(backoff(10) <= MAX);
    }

    #[test]
    fn backoff_jitter_never_exceeds_unjittered_value() {
        for attempt in 0..8 {
            let exp = BASE.saturating_mul(1u32 << attempt).min(MAX);
            assert!(backoff(attempt) <= exp);
        }
    }
}
