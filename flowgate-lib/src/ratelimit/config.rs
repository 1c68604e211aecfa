use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;
use typed_builder::TypedBuilder;

use crate::{ErrorKind, Result};

/// Default number of simultaneously admitted units
const DEFAULT_CONCURRENCY: usize = 5;

/// Default length of the trailing throughput window
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

const DEFAULT_INITIAL_CONCURRENCY: usize = 5;
const DEFAULT_MIN_CONCURRENCY: usize = 1;
const DEFAULT_MAX_CONCURRENCY: usize = 20;
const DEFAULT_BACKOFF_FACTOR: f64 = 0.5;
const DEFAULT_RECOVERY_FACTOR: f64 = 1.2;
const DEFAULT_RECOVERY_THRESHOLD: u32 = 10;

/// Configuration of a [`crate::ratelimit::RateLimiter`]
///
/// Both gates must be open for a unit to be admitted: fewer than
/// `concurrency` units currently held, and fewer than `window_cap`
/// admissions during the trailing `window`.
///
/// ```
/// use flowgate_lib::ratelimit::RateLimitConfig;
/// use std::time::Duration;
///
/// let config: RateLimitConfig = toml::from_str(r#"
///     concurrency = 10
///     window_cap = 60
///     window = "1m"
/// "#).unwrap();
///
/// assert_eq!(config, RateLimitConfig::per_minute(10, 60));
/// assert_eq!(config.window, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum simultaneously admitted units
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum admissions per window, `None` for unlimited
    #[serde(default)]
    pub window_cap: Option<usize>,

    /// Length of the trailing throughput window
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            window_cap: None,
            window: default_window(),
        }
    }
}

const fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

const fn default_window() -> Duration {
    DEFAULT_WINDOW
}

impl RateLimitConfig {
    /// Create a `RateLimitConfig` from optional overrides, using defaults for missing values
    #[must_use]
    pub fn from_options(
        concurrency: Option<usize>,
        window_cap: Option<usize>,
        window: Option<Duration>,
    ) -> Self {
        Self {
            concurrency: concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            window_cap,
            window: window.unwrap_or(DEFAULT_WINDOW),
        }
    }

    /// Concurrency cap only, no throughput limit
    #[must_use]
    pub const fn concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            window_cap: None,
            window: DEFAULT_WINDOW,
        }
    }

    /// The usual provider quota shape, `per_minute` requests over a 60 second window
    #[must_use]
    pub const fn per_minute(concurrency: usize, per_minute: usize) -> Self {
        Self {
            concurrency,
            window_cap: Some(per_minute),
            window: DEFAULT_WINDOW,
        }
    }

    /// Replace the throughput window
    #[must_use]
    pub const fn with_window(mut self, window_cap: usize, window: Duration) -> Self {
        self.window_cap = Some(window_cap);
        self.window = window;
        self
    }

    /// Check that all caps are positive
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] naming the offending field
    pub fn validate(&self) -> Result<()> {
        if self.concurrency < 1 {
            return Err(ErrorKind::invalid_config("concurrency must be at least 1"));
        }
        if self.concurrency > Semaphore::MAX_PERMITS {
            return Err(ErrorKind::invalid_config(format!(
                "concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.window_cap == Some(0) {
            return Err(ErrorKind::invalid_config(
                "window_cap must be at least 1 or unlimited",
            ));
        }
        if self.window.is_zero() {
            return Err(ErrorKind::invalid_config("window must be positive"));
        }
        Ok(())
    }
}

/// Configuration of a [`crate::ratelimit::AdaptiveController`]
///
/// ```
/// use flowgate_lib::ratelimit::AdaptiveConfig;
///
/// let config = AdaptiveConfig::builder()
///     .initial_concurrency(10)
///     .min_concurrency(2)
///     .max_concurrency(50)
///     .build();
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.recovery_threshold, 10);
/// ```
#[derive(TypedBuilder, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveConfig {
    /// Concurrency cap the controller starts with
    #[builder(default = DEFAULT_INITIAL_CONCURRENCY)]
    #[serde(default = "default_initial_concurrency")]
    pub initial_concurrency: usize,

    /// Floor the cap never backs off below
    #[builder(default = DEFAULT_MIN_CONCURRENCY)]
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,

    /// Ceiling the cap never recovers above
    #[builder(default = DEFAULT_MAX_CONCURRENCY)]
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Multiplier applied on every rate-limit event, in `(0, 1)`
    #[builder(default = DEFAULT_BACKOFF_FACTOR)]
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Multiplier applied after `recovery_threshold` consecutive successes, `> 1`
    #[builder(default = DEFAULT_RECOVERY_FACTOR)]
    #[serde(default = "default_recovery_factor")]
    pub recovery_factor: f64,

    /// Consecutive successes needed before the cap is raised
    #[builder(default = DEFAULT_RECOVERY_THRESHOLD)]
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,

    /// Optional fixed throughput limit applied alongside the adaptive cap
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub window_cap: Option<usize>,

    /// Length of the throughput window
    #[builder(default = DEFAULT_WINDOW)]
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Hand rate-limit signals back to the caller after adapting
    #[builder(default)]
    #[serde(default)]
    pub propagate_rate_limit: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

const fn default_initial_concurrency() -> usize {
    DEFAULT_INITIAL_CONCURRENCY
}

const fn default_min_concurrency() -> usize {
    DEFAULT_MIN_CONCURRENCY
}

const fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

const fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

const fn default_recovery_factor() -> f64 {
    DEFAULT_RECOVERY_FACTOR
}

const fn default_recovery_threshold() -> u32 {
    DEFAULT_RECOVERY_THRESHOLD
}

impl AdaptiveConfig {
    /// Check bounds and factors
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if `1 <= min <= initial <= max`
    /// does not hold, if a factor is out of range, or if the window is invalid
    pub fn validate(&self) -> Result<()> {
        if self.min_concurrency < 1 {
            return Err(ErrorKind::invalid_config(
                "min_concurrency must be at least 1",
            ));
        }
        if self.min_concurrency > self.max_concurrency {
            return Err(ErrorKind::invalid_config(format!(
                "min_concurrency ({}) exceeds max_concurrency ({})",
                self.min_concurrency, self.max_concurrency
            )));
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(ErrorKind::invalid_config(format!(
                "max_concurrency must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if !(self.min_concurrency..=self.max_concurrency).contains(&self.initial_concurrency) {
            return Err(ErrorKind::invalid_config(format!(
                "initial_concurrency ({}) must lie within [{}, {}]",
                self.initial_concurrency, self.min_concurrency, self.max_concurrency
            )));
        }
        if !(self.backoff_factor > 0.0 && self.backoff_factor < 1.0) {
            return Err(ErrorKind::invalid_config(
                "backoff_factor must be between 0 and 1 (exclusive)",
            ));
        }
        if !(self.recovery_factor > 1.0 && self.recovery_factor.is_finite()) {
            return Err(ErrorKind::invalid_config(
                "recovery_factor must be greater than 1",
            ));
        }
        if self.recovery_threshold < 1 {
            return Err(ErrorKind::invalid_config(
                "recovery_threshold must be at least 1",
            ));
        }
        self.limiter_config().validate()
    }

    /// Configuration of the inner gate, starting at the initial concurrency
    #[must_use]
    pub const fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            concurrency: self.initial_concurrency,
            window_cap: self.window_cap,
            window: self.window,
        }
    }
}
