//! Delay policy between failed connection attempts.

use std::time::Duration;

use rand::Rng;

/// Smallest delay a policy may hand out.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Produces the wait before the next dial attempt.
///
/// `duration` is called after each failed attempt and `reset` after each
/// successful dial. Implementations must never return a zero duration.
pub trait Backoff: Send {
    fn duration(&mut self) -> Duration;
    fn reset(&mut self);
}

/// Exponential backoff with jitter, capped at `max`.
///
/// Jitter is bounded so a delay never exceeds the next step's base, so the
/// sequence of delays is non-decreasing.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
    pub jitter: bool,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        let initial = initial.max(MIN_DELAY);
        Self {
            initial,
            max: max.max(initial),
            factor: factor.max(1.0),
            jitter: true,
            current: initial,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn next_base(&self) -> Duration {
        self.current.mul_f64(self.factor).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        // 2s → 4s → 8s → 16s → 30s cap
        Self::new(Duration::from_secs(2), Duration::from_secs(30), 2.0)
    }
}

impl Backoff for ExponentialBackoff {
    fn duration(&mut self) -> Duration {
        let base = self.current;
        let next = self.next_base();

        let mut delay = base;
        if self.jitter {
            let spread = (next.saturating_sub(base)).min(base / 4).as_millis() as u64;
            if spread > 0 {
                delay += Duration::from_millis(rand::thread_rng().gen_range(0..spread));
            }
        }

        self.current = next;
        delay.clamp(MIN_DELAY, self.max)
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_ceiling() {
        let mut b = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 2.0)
            .without_jitter();
        let got: Vec<u64> = (0..5).map(|_| b.duration().as_secs()).collect();
        assert_eq!(got, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut b = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5), 2.0)
            .without_jitter();
        b.duration();
        b.duration();
        b.reset();
        assert_eq!(b.duration(), Duration::from_millis(100));
    }

    #[test]
    fn jittered_sequence_is_non_decreasing_and_positive() {
        let mut b = ExponentialBackoff::default();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let d = b.duration();
            assert!(d > Duration::ZERO);
            assert!(d >= last, "{d:?} < {last:?}");
            assert!(d <= b.max);
            last = d;
        }
    }

    #[test]
    fn zero_config_still_waits() {
        let mut b = ExponentialBackoff::new(Duration::ZERO, Duration::ZERO, 0.0);
        assert!(b.duration() > Duration::ZERO);
        assert!(b.duration() > Duration::ZERO);
    }
}
