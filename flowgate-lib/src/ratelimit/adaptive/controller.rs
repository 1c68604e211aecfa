use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::RateLimitSignal;
use crate::Result;
use crate::ratelimit::adaptive::state::{AdaptiveState, Transition};
use crate::ratelimit::{AdaptiveConfig, AdaptiveStats, Classifier, Permit, RateLimiter};

/// Failure returned by [`AdaptiveController::run`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Escalated<E> {
    /// The unit was throttled and the controller is configured to
    /// propagate rate limits to an enclosing layer.
    /// The controller has already adapted to this event.
    #[error("{signal}")]
    RateLimited {
        /// The error raised by the unit of work
        error: E,
        /// The classified throttling signal
        signal: RateLimitSignal,
    },

    /// Any other failure, including rate limits when propagation is disabled
    #[error("{0}")]
    Failed(E),
}

impl<E> Escalated<E> {
    /// The signal to re-raise, if any
    #[must_use]
    pub const fn signal(&self) -> Option<&RateLimitSignal> {
        match self {
            Self::RateLimited { signal, .. } => Some(signal),
            Self::Failed(_) => None,
        }
    }

    /// The error raised by the unit of work
    pub fn into_inner(self) -> E {
        match self {
            Self::RateLimited { error, .. } | Self::Failed(error) => error,
        }
    }
}

/// A concurrency gate that tunes its own cap from observed outcomes.
///
/// Every success counts towards recovery; after `recovery_threshold`
/// consecutive successes the cap grows by `recovery_factor` (at least by one)
/// up to `max_concurrency`. Every classified rate limit shrinks the cap by
/// `backoff_factor`, down to `min_concurrency`. The cap is applied to an
/// inner [`RateLimiter`] which also enforces the optional throughput window.
///
/// `E` is the error type of the units of work, inspected by the
/// [`Classifier`] given at construction.
///
/// # Examples
///
/// ```
/// use flowgate_lib::ratelimit::{AdaptiveConfig, AdaptiveController, Escalated};
///
/// # #[tokio::main]
/// # async fn main() -> flowgate_lib::Result<()> {
/// let config = AdaptiveConfig::builder()
///     .initial_concurrency(10)
///     .min_concurrency(2)
///     .max_concurrency(50)
///     .build();
/// let controller = AdaptiveController::<String>::new(config)?;
///
/// let result: Result<(), _> = controller
///     .run(async { Err("429 Too Many Requests".to_string()) })
///     .await;
/// assert!(matches!(result, Err(Escalated::Failed(_))));
/// assert_eq!(controller.current_concurrency(), 5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AdaptiveController<E> {
    config: AdaptiveConfig,
    limiter: RateLimiter,
    // Lock order: `state`, then the limiter's own lock
    state: Mutex<AdaptiveState>,
    classifier: Classifier<E>,
}

impl<E: Display + 'static> AdaptiveController<E> {
    /// Create a controller that detects rate limits from the error's display text
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::InvalidConfig`] if the bounds or factors are out of range
    pub fn new(config: AdaptiveConfig) -> Result<Self> {
        Self::with_classifier(config, Classifier::keywords())
    }
}

impl<E> AdaptiveController<E> {
    /// Create a controller with a custom rate-limit classifier
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::InvalidConfig`] if the bounds or factors are out of range
    pub fn with_classifier(config: AdaptiveConfig, classifier: Classifier<E>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            limiter: RateLimiter::new(config.limiter_config())?,
            state: Mutex::new(AdaptiveState::new(config.initial_concurrency)),
            classifier,
        })
    }

    fn lock(&self) -> MutexGuard<'_, AdaptiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, transition: Option<Transition>) {
        if let Some(Transition { to, .. }) = transition {
            self.limiter.set_concurrency_cap(to);
        }
    }

    /// Wait for admission under the current concurrency cap
    pub async fn acquire(&self) -> Permit<'_> {
        self.limiter.acquire().await
    }

    /// Report a successful unit of work
    pub fn record_success(&self) {
        let mut state = self.lock();
        let transition = state.on_success(&self.config);
        if let Some(Transition { from, to }) = transition {
            log::debug!("Recovered concurrency from {from} to {to}");
        }
        self.apply(transition);
    }

    /// Report a unit of work that was throttled
    pub fn record_rate_limit(&self, signal: &RateLimitSignal) {
        let mut state = self.lock();
        let transition = state.on_rate_limit(&self.config);
        match transition {
            Some(Transition { from, to }) => {
                log::debug!("Rate limit hit ({signal}), backing off concurrency from {from} to {to}");
            }
            None => log::debug!(
                "Rate limit hit ({signal}), concurrency already at minimum {}",
                state.current_concurrency()
            ),
        }
        self.apply(transition);
    }

    /// Classify a failure without recording it
    #[must_use]
    pub fn classify(&self, error: &E) -> Option<RateLimitSignal> {
        self.classifier.classify(error)
    }

    /// Record the outcome of one unit of work and return the rate-limit
    /// signal if the failure was classified as one
    pub(crate) fn feedback<T>(&self, outcome: &std::result::Result<T, E>) -> Option<RateLimitSignal> {
        match outcome {
            Ok(_) => {
                self.record_success();
                None
            }
            Err(error) => {
                let signal = self.classify(error)?;
                self.record_rate_limit(&signal);
                Some(signal)
            }
        }
    }

    /// Record `outcome` and map a failure to its [`Escalated`] form
    ///
    /// # Errors
    ///
    /// Returns [`Escalated::RateLimited`] for a classified rate limit when
    /// `propagate_rate_limit` is set, and [`Escalated::Failed`] for every
    /// other error
    pub fn observe<T>(&self, outcome: std::result::Result<T, E>) -> std::result::Result<T, Escalated<E>> {
        let signal = self.feedback(&outcome);
        outcome.map_err(|error| match signal {
            Some(signal) if self.config.propagate_rate_limit => {
                Escalated::RateLimited { error, signal }
            }
            _ => Escalated::Failed(error),
        })
    }

    /// Run one unit of work under the gate.
    ///
    /// The outcome is recorded before the slot is released, so the next
    /// admission already sees the adjusted cap.
    ///
    /// # Errors
    ///
    /// See [`AdaptiveController::observe`]
    pub async fn run<T, Fut>(&self, work: Fut) -> std::result::Result<T, Escalated<E>>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let _permit = self.acquire().await;
        let outcome = work.await;
        self.observe(outcome)
    }

    /// Live concurrency cap
    #[must_use]
    pub fn current_concurrency(&self) -> usize {
        self.lock().current_concurrency()
    }

    /// Snapshot of the adaptive counters
    #[must_use]
    pub fn stats(&self) -> AdaptiveStats {
        self.lock().stats()
    }

    /// Restore the initial concurrency and clear every counter and the window
    pub fn reset(&self) {
        let mut state = self.lock();
        *state = AdaptiveState::new(self.config.initial_concurrency);
        self.limiter.set_concurrency_cap(self.config.initial_concurrency);
        self.limiter.reset();
    }

    /// Configuration the controller was created with
    #[must_use]
    pub const fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// The inner gate carrying the live cap
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The classifier deciding which failures count as rate limits
    #[must_use]
    pub const fn classifier(&self) -> &Classifier<E> {
        &self.classifier
    }
}
