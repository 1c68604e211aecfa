use std::fmt::{self, Display};
use std::sync::Arc;

use crate::{ErrorKind, RateLimitSignal};

/// Substrings that identify a throttling error in most provider SDKs
const RATE_LIMIT_INDICATORS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "too many requests",
    "quota exceeded",
    "throttl",
];

/// Check if an error message looks like a throttling error (case-insensitive)
#[must_use]
pub fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();
    RATE_LIMIT_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
}

type ClassifyFn<E> = dyn Fn(&E) -> Option<RateLimitSignal> + Send + Sync;

/// Decides whether a failed unit of work was throttled by the remote resource.
///
/// Provider SDKs report rate limits in many shapes, so detection is injected
/// at construction instead of being tied to one error type.
///
/// ```
/// use flowgate_lib::ratelimit::Classifier;
///
/// let classifier = Classifier::<String>::keywords();
/// assert!(classifier.classify(&"HTTP 429 Too Many Requests".to_string()).is_some());
/// assert!(classifier.classify(&"connection reset".to_string()).is_none());
/// ```
pub struct Classifier<E> {
    inner: Arc<ClassifyFn<E>>,
}

impl<E: 'static> Classifier<E> {
    /// Classify with a predicate; the signal message is the error's display text
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        E: Display,
    {
        Self::with_signal(move |error: &E| {
            predicate(error).then(|| RateLimitSignal::new(error.to_string()))
        })
    }

    /// Classify with a function that builds the full signal, e.g. to carry
    /// a retry-after hint taken from the provider's error
    pub fn with_signal<F>(classify: F) -> Self
    where
        F: Fn(&E) -> Option<RateLimitSignal> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(classify),
        }
    }

    /// Never report a rate limit
    #[must_use]
    pub fn never() -> Self {
        Self::with_signal(|_: &E| None)
    }
}

impl<E> Classifier<E> {
    /// The rate-limit signal for `error`, or `None` for an ordinary failure
    #[must_use]
    pub fn classify(&self, error: &E) -> Option<RateLimitSignal> {
        (self.inner)(error)
    }
}

impl<E: Display + 'static> Classifier<E> {
    /// Match the error's display text against common throttling phrases
    /// (`429`, `rate limit`, `too many requests`, `quota exceeded`, ...)
    #[must_use]
    pub fn keywords() -> Self {
        Self::new(|error: &E| is_rate_limit_message(&error.to_string()))
    }
}

impl Classifier<ErrorKind> {
    /// Recognise [`ErrorKind::RateLimited`], the variant nested dispatch layers
    /// escalate with
    #[must_use]
    pub fn error_kind() -> Self {
        Self::with_signal(|error: &ErrorKind| error.as_rate_limit().cloned())
    }
}

impl<E: Display + 'static> Default for Classifier<E> {
    fn default() -> Self {
        Self::keywords()
    }
}

impl<E> Clone for Classifier<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Classifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case("Error 429: slow down", true)]
    #[case("Rate limit exceeded for model gpt-4", true)]
    #[case("rate_limit_error", true)]
    #[case("Too Many Requests", true)]
    #[case("Quota exceeded for project", true)]
    #[case("Request was throttled", true)]
    #[case("ThrottlingException", true)]
    #[case("Connection refused", false)]
    #[case("Invalid API key", false)]
    fn test_rate_limit_messages(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(is_rate_limit_message(message), expected);
    }

    #[test]
    fn test_keyword_signal_carries_message() {
        let classifier = Classifier::<String>::default();
        let signal = classifier
            .classify(&"429 Too Many Requests".to_string())
            .unwrap();
        assert_eq!(signal.message, "429 Too Many Requests");
        assert_eq!(signal.retry_after, None);
    }

    #[derive(Debug)]
    struct ProviderError {
        status: u16,
        retry_after_secs: Option<u64>,
    }

    #[test]
    fn test_custom_signal() {
        let classifier = Classifier::with_signal(|error: &ProviderError| {
            (error.status == 429).then(|| {
                let signal = RateLimitSignal::new("throttled").with_origin("provider");
                match error.retry_after_secs {
                    Some(secs) => signal.with_retry_after(Duration::from_secs(secs)),
                    None => signal,
                }
            })
        });

        let signal = classifier
            .classify(&ProviderError {
                status: 429,
                retry_after_secs: Some(7),
            })
            .unwrap();
        assert_eq!(signal.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(signal.origin.as_deref(), Some("provider"));

        assert!(
            classifier
                .classify(&ProviderError {
                    status: 500,
                    retry_after_secs: None,
                })
                .is_none()
        );
    }

    #[test]
    fn test_error_kind_classifier() {
        let classifier = Classifier::error_kind();
        let signal = RateLimitSignal::new("inner layer throttled");

        assert_eq!(
            classifier.classify(&ErrorKind::RateLimited(signal.clone())),
            Some(signal)
        );
        assert_eq!(
            classifier.classify(&ErrorKind::RegistryKeyError("x".into())),
            None
        );
    }

    #[test]
    fn test_never() {
        assert!(Classifier::<String>::never().classify(&"429".into()).is_none());
    }
}
