use crate::ratelimit::{AdaptiveConfig, AdaptiveStats};

/// A change of the live concurrency cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Cap before the event
    pub from: usize,
    /// Cap after the event
    pub to: usize,
}

/// Counters behind an [`crate::ratelimit::AdaptiveController`].
///
/// Transitions are pure functions of the current state and the config so a
/// scripted event sequence always ends in the same place. The controller
/// serializes calls; this type does no locking of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AdaptiveState {
    current_concurrency: usize,
    consecutive_successes: u32,
    total_successes: u64,
    total_rate_limits: u64,
}

impl AdaptiveState {
    pub(crate) const fn new(initial_concurrency: usize) -> Self {
        Self {
            current_concurrency: initial_concurrency,
            consecutive_successes: 0,
            total_successes: 0,
            total_rate_limits: 0,
        }
    }

    pub(crate) const fn current_concurrency(&self) -> usize {
        self.current_concurrency
    }

    /// Count a success and raise the cap once the recovery threshold is reached
    pub(crate) fn on_success(&mut self, config: &AdaptiveConfig) -> Option<Transition> {
        self.consecutive_successes += 1;
        self.total_successes += 1;

        if self.consecutive_successes < config.recovery_threshold {
            return None;
        }
        self.consecutive_successes = 0;

        let from = self.current_concurrency;
        let scaled = scale(from, config.recovery_factor);
        // small caps would otherwise never grow, e.g. floor(2 * 1.2) = 2
        let raised = if scaled > from { scaled } else { from + 1 };
        self.current_concurrency = raised.min(config.max_concurrency);
        self.transition(from)
    }

    /// Count a rate-limit event and shrink the cap
    pub(crate) fn on_rate_limit(&mut self, config: &AdaptiveConfig) -> Option<Transition> {
        self.consecutive_successes = 0;
        self.total_rate_limits += 1;

        let from = self.current_concurrency;
        self.current_concurrency = scale(from, config.backoff_factor).max(config.min_concurrency);
        self.transition(from)
    }

    fn transition(&self, from: usize) -> Option<Transition> {
        (from != self.current_concurrency).then_some(Transition {
            from,
            to: self.current_concurrency,
        })
    }

    pub(crate) const fn stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            current_concurrency: self.current_concurrency,
            consecutive_successes: self.consecutive_successes,
            total_successes: self.total_successes,
            total_rate_limits: self.total_rate_limits,
        }
    }
}

/// `floor(value * factor)`
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scale(value: usize, factor: f64) -> usize {
    (value as f64 * factor).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    enum Event {
        Success,
        RateLimit,
    }

    fn config(initial: usize, min: usize, max: usize) -> AdaptiveConfig {
        AdaptiveConfig::builder()
            .initial_concurrency(initial)
            .min_concurrency(min)
            .max_concurrency(max)
            .build()
    }

    fn replay(config: &AdaptiveConfig, events: &[Event]) -> AdaptiveState {
        let mut state = AdaptiveState::new(config.initial_concurrency);
        for event in events {
            match event {
                Event::Success => state.on_success(config),
                Event::RateLimit => state.on_rate_limit(config),
            };
        }
        state
    }

    #[test]
    fn test_backoff_halves_down_to_min() {
        let config = config(10, 1, 20);
        let mut state = AdaptiveState::new(10);

        assert_eq!(
            state.on_rate_limit(&config),
            Some(Transition { from: 10, to: 5 })
        );
        assert_eq!(
            state.on_rate_limit(&config),
            Some(Transition { from: 5, to: 2 })
        );
        assert_eq!(
            state.on_rate_limit(&config),
            Some(Transition { from: 2, to: 1 })
        );
        assert_eq!(state.on_rate_limit(&config), None);
        assert_eq!(state.current_concurrency(), 1);
        assert_eq!(state.stats().total_rate_limits, 4);
    }

    #[test]
    fn test_recovery_after_threshold() {
        let config = config(10, 1, 20);
        let mut state = AdaptiveState::new(10);

        for _ in 0..9 {
            assert_eq!(state.on_success(&config), None);
        }
        assert_eq!(
            state.on_success(&config),
            Some(Transition { from: 10, to: 12 })
        );
        assert_eq!(state.stats().consecutive_successes, 0);
        assert_eq!(state.stats().total_successes, 10);
    }

    #[test]
    fn test_recovery_grows_small_caps_by_at_least_one() {
        let config = config(2, 1, 20);
        let state = replay(&config, &(0..10).map(|_| Event::Success).collect::<Vec<_>>());
        assert_eq!(state.current_concurrency(), 3);
    }

    #[test]
    fn test_recovery_does_not_exceed_max() {
        let config = config(19, 1, 20);
        let state = replay(&config, &(0..30).map(|_| Event::Success).collect::<Vec<_>>());
        assert_eq!(state.current_concurrency(), 20);
    }

    #[test]
    fn test_rate_limit_resets_consecutive_successes() {
        let config = config(10, 1, 20);
        let mut events: Vec<_> = (0..9).map(|_| Event::Success).collect();
        events.push(Event::RateLimit);
        events.extend((0..9).map(|_| Event::Success));

        let state = replay(&config, &events);
        assert_eq!(
            state.stats(),
            AdaptiveStats {
                current_concurrency: 5,
                consecutive_successes: 9,
                total_successes: 18,
                total_rate_limits: 1,
            }
        );
    }

    #[test]
    fn test_scripted_sequence() {
        let config = config(10, 2, 50);
        // 10 -> 5 (backoff), 5 -> 6 (recovery), 6 -> 3 (backoff), 3 -> 2 (backoff),
        // 2 -> 3 (recovery, +1 floor)
        let mut events = vec![Event::RateLimit];
        events.extend((0..10).map(|_| Event::Success));
        events.push(Event::RateLimit);
        events.push(Event::RateLimit);
        events.extend((0..10).map(|_| Event::Success));

        let state = replay(&config, &events);
        assert_eq!(state.current_concurrency(), 3);
        assert_eq!(state.stats().total_rate_limits, 3);
        assert_eq!(state.stats().total_successes, 20);
    }

    #[test]
    fn test_bounds_hold_for_long_traces() {
        let config = config(8, 2, 16);
        let mut state = AdaptiveState::new(8);
        let mut seed: u32 = 0x2545_f491;

        for _ in 0..10_000 {
            // xorshift, one rate limit per ~8 events
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 8 == 0 {
                state.on_rate_limit(&config);
            } else {
                state.on_success(&config);
            }
            assert!((2..=16).contains(&state.current_concurrency()));
        }
    }
}
