//! Delay / jitter utility — randomized inter-step pacing.
//!
//! Modeled on the teacher `features/antibot.rs` `RequestDelay` (min/max range
//! + presets + jittered `random_delay`). Provides:
//!   - [`input_gap_ms`] — a bare millisecond value for synthetic input cadence.
//!   - [`sleep_between`] — await a random delay within an ad-hoc range.
//!   - [`StepDelay`] — a named range per renewal flow point with an async
//!     [`StepDelay::wait`].

use std::time::Duration;

use rand::Rng;
use tracing::trace;

/// Return a random millisecond value within the inclusive `[min_ms, max_ms]`
/// range, used for synthetic input cadence (keystroke / click gaps).
pub fn input_gap_ms(min_ms: u64, max_ms: u64) -> u64 {
    let (lo, hi) = order(min_ms, max_ms);
    if lo == hi {
        return lo;
    }
    rand::rng().random_range(lo..=hi)
}

/// Sleep for a random duration within the inclusive `[min_ms, max_ms]` range.
pub async fn sleep_between(min_ms: u64, max_ms: u64) {
    let ms = input_gap_ms(min_ms, max_ms);
    trace!("sleep_between: {}ms", ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// A randomized inter-step delay range (milliseconds) for a renewal flow point.
#[derive(Debug, Clone, Copy)]
pub struct StepDelay {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl StepDelay {
    /// Construct an explicit delay range.
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        let (min_ms, max_ms) = order(min_ms, max_ms);
        Self { min_ms, max_ms }
    }

    /// Pick a jittered delay within the range.
    pub fn random_ms(&self) -> u64 {
        input_gap_ms(self.min_ms, self.max_ms)
    }

    /// Await a random delay within the range.
    pub async fn wait(&self) {
        let ms = self.random_ms();
        trace!("StepDelay::wait: {}ms", ms);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Pause between consecutive services of one account.
    pub fn between_services() -> Self {
        Self::new(1_500, 3_000)
    }

    /// Settle before submitting a renewal form.
    pub fn before_submit() -> Self {
        Self::new(800, 1_800)
    }

    /// Wait before polling for the generated invoice.
    pub fn before_invoice_check() -> Self {
        Self::new(1_000, 2_500)
    }

    /// Pause between consecutive invoice settlements.
    pub fn between_invoices() -> Self {
        Self::new(1_000, 2_000)
    }
}

/// Normalize a possibly-inverted range to `(low, high)`.
fn order(a: u64, b: u64) -> (u64, u64) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_gap_within_range() {
        for _ in 0..100 {
            let v = input_gap_ms(50, 150);
            assert!((50..=150).contains(&v));
        }
    }

    #[test]
    fn input_gap_inverted_range_is_normalized() {
        for _ in 0..100 {
            let v = input_gap_ms(150, 50);
            assert!((50..=150).contains(&v));
        }
    }

    #[test]
    fn input_gap_degenerate_range() {
        assert_eq!(input_gap_ms(100, 100), 100);
    }

    #[test]
    fn step_delay_presets_are_ordered() {
        for d in [
            StepDelay::new(1_500, 3_000),
            StepDelay::between_services(),
            StepDelay::before_submit(),
            StepDelay::before_invoice_check(),
            StepDelay::between_invoices(),
        ] {
            assert!(d.min_ms <= d.max_ms);
            assert!((d.min_ms..=d.max_ms).contains(&d.random_ms()));
        }
    }
}
