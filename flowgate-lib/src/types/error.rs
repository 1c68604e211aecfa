use serde::{Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

/// Possible errors when interacting with `flowgate_lib`
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A limiter with this name is already registered and overwriting was not requested
    #[error("Limiter `{0}` is already registered. Pass `overwrite` to replace it")]
    RegistryKeyConflict(String),

    /// No limiter is registered under this name
    #[error(
        "Limiter `{0}` is not registered. Register it first or use `LimiterRegistry::get_or_create`"
    )]
    RegistryKeyError(String),

    /// A limiter or controller was constructed with out-of-range parameters
    #[error("Invalid rate limit configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration
        reason: String,
    },

    /// The remote resource throttled a unit of work
    #[error(transparent)]
    RateLimited(#[from] RateLimitSignal),
}

impl ErrorKind {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// The throttling signal carried by this error, if any
    #[must_use]
    pub const fn as_rate_limit(&self) -> Option<&RateLimitSignal> {
        match self {
            Self::RateLimited(signal) => Some(signal),
            _ => None,
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Raised by a unit of work (or detected by a [`crate::ratelimit::Classifier`])
/// when the remote resource rejected a call because of throttling.
///
/// The signal travels up nested dispatch layers so that an outer
/// [`crate::ratelimit::AdaptiveController`] can adapt after the inner one did.
///
/// # Examples
///
/// ```
/// use flowgate_lib::RateLimitSignal;
/// use std::time::Duration;
///
/// let signal = RateLimitSignal::new("OpenAI rate limit exceeded")
///     .with_retry_after(Duration::from_secs(20))
///     .with_origin("openai");
///
/// assert_eq!(signal.to_string(), "OpenAI rate limit exceeded");
/// assert_eq!(signal.origin.as_deref(), Some("openai"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct RateLimitSignal {
    /// Human-readable description of the rate limit
    pub message: String,
    /// How long the resource asked us to wait, if it said so
    #[serde(with = "humantime_serde")]
    pub retry_after: Option<Duration>,
    /// Identifier of the throttling resource, e.g. `"openai"`
    pub origin: Option<String>,
}

impl RateLimitSignal {
    /// Create a signal with the given message and no hints
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_after: None,
            origin: None,
        }
    }

    /// Attach a retry-after hint
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Attach the identifier of the throttling resource
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

impl Default for RateLimitSignal {
    fn default() -> Self {
        Self::new("Rate limit hit")
    }
}
