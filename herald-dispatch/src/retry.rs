//! Retry backoff policy.
//!
//! Delays come from a configurable schedule indexed by attempt number
//! (the defaults are 30s, 2m, 10m), with attempts past the end reusing the
//! last entry. Jitter spreads retries out so a burst of failures does not
//! come back as a thundering herd.

use std::time::Duration;

use rand::Rng;

/// Backoff delay before retry number `attempt` (1-indexed), with jitter.
///
/// The schedule entry at `attempt - 1` is used; attempts past the end of
/// the schedule reuse the last entry, and an empty schedule means an
/// immediate retry. Jitter scales the delay by `1 ± jitter_factor`.
#[must_use]
pub fn backoff_delay(attempt: u32, schedule_secs: &[u64], jitter_factor: f64) -> Duration {
    let index = attempt.saturating_sub(1) as usize;
    let base = schedule_secs
        .get(index)
        .or_else(|| schedule_secs.last())
        .copied()
        .unwrap_or(0);

    if base == 0 || jitter_factor <= 0.0 {
        return Duration::from_secs(base);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "Second-granularity delays are nowhere near the lossy ranges"
    )]
    let jittered = {
        let spread = (base as f64) * jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        ((base as f64) + offset).max(0.0) as u64
    };

    Duration::from_secs(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEDULE: &[u64] = &[30, 120, 600];

    #[test]
    fn schedule_is_indexed_by_attempt() {
        // Jitter disabled for predictable results.
        assert_eq!(backoff_delay(1, SCHEDULE, 0.0), Duration::from_secs(30));
        assert_eq!(backoff_delay(2, SCHEDULE, 0.0), Duration::from_secs(120));
        assert_eq!(backoff_delay(3, SCHEDULE, 0.0), Duration::from_secs(600));
    }

    #[test]
    fn attempts_past_the_end_reuse_the_last_entry() {
        assert_eq!(backoff_delay(4, SCHEDULE, 0.0), Duration::from_secs(600));
        assert_eq!(backoff_delay(20, SCHEDULE, 0.0), Duration::from_secs(600));
    }

    #[test]
    fn empty_schedule_means_immediate_retry() {
        assert_eq!(backoff_delay(1, &[], 0.2), Duration::ZERO);
        assert_eq!(backoff_delay(5, &[], 0.0), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        // Attempt 2: expected 120s, with ±20% jitter = 96..=144 seconds.
        for _ in 0..50 {
            let delay = backoff_delay(2, SCHEDULE, 0.2).as_secs();
            assert!(
                (96..=144).contains(&delay),
                "delay {delay} outside jitter range [96, 144]"
            );
        }
    }
}
