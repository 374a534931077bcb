//! Backoff interval strategies
//!
//! Maps a 1-based attempt number to the delay that precedes it.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

/// Attempt number to wait duration
#[derive(Clone)]
pub enum IntervalStrategy {
    Fixed(Duration),
    Linear {
        initial: Duration,
        increment: Duration,
        max: Duration,
    },
    ExponentialBackoff {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    Fibonacci {
        initial: Duration,
        max: Duration,
    },
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl IntervalStrategy {
    pub fn fixed(interval: Duration) -> Self {
        IntervalStrategy::Fixed(interval)
    }

    pub fn linear(initial: Duration, increment: Duration, max: Duration) -> Self {
        IntervalStrategy::Linear {
            initial,
            increment,
            max,
        }
    }

    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        IntervalStrategy::ExponentialBackoff {
            initial,
            multiplier,
            max,
        }
    }

    pub fn fibonacci(initial: Duration, max: Duration) -> Self {
        IntervalStrategy::Fibonacci { initial, max }
    }

    pub fn custom(f: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        IntervalStrategy::Custom(Arc::new(f))
    }

    /// Wait duration before `attempt` (1-based)
    ///
    /// Attempt 0 is treated as attempt 1. The result never exceeds the
    /// configured maximum, including on arithmetic overflow.
    pub fn calculate_interval(&self, attempt: u32) -> Duration {
        let step = attempt.saturating_sub(1);
        match self {
            IntervalStrategy::Fixed(interval) => *interval,
            IntervalStrategy::Linear {
                initial,
                increment,
                max,
            } => increment
                .checked_mul(step)
                .and_then(|grown| initial.checked_add(grown))
                .map_or(*max, |interval| interval.min(*max)),
            IntervalStrategy::ExponentialBackoff {
                initial,
                multiplier,
                max,
            } => {
                let exponent = i32::try_from(step).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                Duration::try_from_secs_f64(secs).map_or(*max, |interval| interval.min(*max))
            }
            IntervalStrategy::Fibonacci { initial, max } => u32::try_from(fibonacci(attempt))
                .ok()
                .and_then(|factor| initial.checked_mul(factor))
                .map_or(*max, |interval| interval.min(*max)),
            IntervalStrategy::Custom(f) => f(attempt),
        }
    }

    /// Upper bound of the strategy, if it has one
    pub fn max_interval(&self) -> Option<Duration> {
        match self {
            IntervalStrategy::Fixed(interval) => Some(*interval),
            IntervalStrategy::Linear { max, .. }
            | IntervalStrategy::ExponentialBackoff { max, .. }
            | IntervalStrategy::Fibonacci { max, .. } => Some(*max),
            IntervalStrategy::Custom(_) => None,
        }
    }
}

impl Default for IntervalStrategy {
    fn default() -> Self {
        IntervalStrategy::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(60))
    }
}

impl fmt::Debug for IntervalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalStrategy::Fixed(interval) => f.debug_tuple("Fixed").field(interval).finish(),
            IntervalStrategy::Linear {
                initial,
                increment,
                max,
            } => f
                .debug_struct("Linear")
                .field("initial", initial)
                .field("increment", increment)
                .field("max", max)
                .finish(),
            IntervalStrategy::ExponentialBackoff {
                initial,
                multiplier,
                max,
            } => f
                .debug_struct("ExponentialBackoff")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("max", max)
                .finish(),
            IntervalStrategy::Fibonacci { initial, max } => f
                .debug_struct("Fibonacci")
                .field("initial", initial)
                .field("max", max)
                .finish(),
            IntervalStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// fib(0) = 0, fib(1) = 1, saturating at `u64::MAX`
fn fibonacci(n: u32) -> u64 {
    let (mut current, mut next) = (0u64, 1u64);
    for _ in 0..n {
        let sum = current.saturating_add(next);
        current = next;
        next = sum;
        if current == u64::MAX {
            break;
        }
    }
    current
}

/// Serializable description of an interval strategy, used by policy files
///
/// Durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntervalSpec {
    Fixed {
        interval_ms: u64,
    },
    Linear {
        initial_ms: u64,
        increment_ms: u64,
        max_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
    Fibonacci {
        initial_ms: u64,
        max_ms: u64,
    },
}

impl From<IntervalSpec> for IntervalStrategy {
    fn from(spec: IntervalSpec) -> Self {
        match spec {
            IntervalSpec::Fixed { interval_ms } => {
                IntervalStrategy::fixed(Duration::from_millis(interval_ms))
            }
            IntervalSpec::Linear {
                initial_ms,
                increment_ms,
                max_ms,
            } => IntervalStrategy::linear(
                Duration::from_millis(initial_ms),
                Duration::from_millis(increment_ms),
                Duration::from_millis(max_ms),
            ),
            IntervalSpec::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => IntervalStrategy::exponential(
                Duration::from_millis(initial_ms),
                multiplier,
                Duration::from_millis(max_ms),
            ),
            IntervalSpec::Fibonacci { initial_ms, max_ms } => IntervalStrategy::fibonacci(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let strategy =
            IntervalStrategy::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(60));

        let intervals: Vec<_> = (1..=10).map(|n| strategy.calculate_interval(n)).collect();
        assert_eq!(intervals, secs(&[1, 2, 4, 8, 16, 32, 60, 60, 60, 60]));
    }

    #[test]
    fn test_exponential_backoff_huge_attempt() {
        let strategy =
            IntervalStrategy::exponential(Duration::from_secs(1), 2.0, Duration::from_secs(60));
        assert_eq!(strategy.calculate_interval(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_fibonacci_sequence() {
        let strategy = IntervalStrategy::fibonacci(Duration::from_secs(1), Duration::from_secs(1000));

        let intervals: Vec<_> = (1..=6).map(|n| strategy.calculate_interval(n)).collect();
        assert_eq!(intervals, secs(&[1, 1, 2, 3, 5, 8]));
    }

    #[test]
    fn test_fibonacci_caps_at_max() {
        let strategy = IntervalStrategy::fibonacci(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(strategy.calculate_interval(7), Duration::from_secs(10));
        assert_eq!(strategy.calculate_interval(200), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_growth() {
        let strategy = IntervalStrategy::linear(
            Duration::from_secs(2),
            Duration::from_secs(3),
            Duration::from_secs(10),
        );

        let intervals: Vec<_> = (1..=5).map(|n| strategy.calculate_interval(n)).collect();
        assert_eq!(intervals, secs(&[2, 5, 8, 10, 10]));
    }

    #[test]
    fn test_fixed_and_custom() {
        let fixed = IntervalStrategy::fixed(Duration::from_millis(250));
        assert_eq!(fixed.calculate_interval(1), Duration::from_millis(250));
        assert_eq!(fixed.calculate_interval(9), Duration::from_millis(250));

        let custom = IntervalStrategy::custom(|attempt| Duration::from_millis(u64::from(attempt) * 100));
        assert_eq!(custom.calculate_interval(3), Duration::from_millis(300));
        assert_eq!(custom.max_interval(), None);
    }

    #[test]
    fn test_attempt_zero_is_first_attempt() {
        let strategy = IntervalStrategy::default();
        assert_eq!(strategy.calculate_interval(0), strategy.calculate_interval(1));
    }

    #[test]
    fn test_fibonacci_numbers() {
        assert_eq!(fibonacci(0), 0);
        assert_eq!(fibonacci(1), 1);
        assert_eq!(fibonacci(2), 1);
        assert_eq!(fibonacci(10), 55);
        assert_eq!(fibonacci(500), u64::MAX);
    }

    #[test]
    fn test_interval_spec_from_json() {
        let spec: IntervalSpec = serde_json::from_str(
            r#"{"type":"exponential","initial_ms":500,"multiplier":3.0,"max_ms":5000}"#,
        )
        .unwrap();

        let strategy = IntervalStrategy::from(spec);
        assert_eq!(strategy.calculate_interval(1), Duration::from_millis(500));
        assert_eq!(strategy.calculate_interval(2), Duration::from_millis(1500));
        assert_eq!(strategy.calculate_interval(4), Duration::from_millis(5000));
        assert_eq!(strategy.max_interval(), Some(Duration::from_millis(5000)));
    }
}
