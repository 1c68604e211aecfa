//! `test-utils` is used for testing `flowgate-lib`.
//! This crate does not depend on `flowgate-lib`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Build `Params` from `key => value` pairs; `Params` must be in scope
///
/// ```ignore
/// let params = params! { "model" => "small", "id" => 3 };
/// ```
#[macro_export]
macro_rules! params {
    ($($key:expr => $value:expr),* $(,)?) => {
        Params::new()$(.with($key, $value))*
    };
}

/// Records how many units are inside a tracked section at the same time
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    entered: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    /// Create a probe with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the tracked section until the guard is dropped
    #[must_use]
    pub fn enter(&self) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.entered.fetch_add(1, Ordering::SeqCst);
        ProbeGuard {
            current: self.current.clone(),
        }
    }

    /// Run `fut` inside the tracked section
    pub async fn track<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.enter();
        fut.await
    }

    /// Units inside the section right now
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of units that were ever inside at once
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of times the section was entered
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

/// Leaves the tracked section when dropped
#[derive(Debug)]
pub struct ProbeGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A unit of work that is throttled on its first calls and succeeds afterwards
#[derive(Debug, Clone)]
pub struct FlakyWork {
    calls: Arc<AtomicUsize>,
    throttled_calls: usize,
}

impl FlakyWork {
    /// Error message returned while throttled
    pub const RATE_LIMITED: &'static str = "429 Too Many Requests";

    /// Throttle the first `throttled_calls` calls
    #[must_use]
    pub fn new(throttled_calls: usize) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            throttled_calls,
        }
    }

    /// Returns the zero-based call number, or [`FlakyWork::RATE_LIMITED`]
    ///
    /// # Errors
    ///
    /// Fails for the first `throttled_calls` calls
    pub fn call(&self) -> Result<usize, String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.throttled_calls {
            Err(Self::RATE_LIMITED.to_string())
        } else {
            Ok(call)
        }
    }

    /// Number of calls so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tracks_peak() {
        let probe = ConcurrencyProbe::new();
        let first = probe.enter();
        let second = probe.enter();
        assert_eq!(probe.current(), 2);
        drop(first);
        drop(second);
        let _third = probe.enter();

        assert_eq!(probe.current(), 1);
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.entered(), 3);
    }

    #[test]
    fn test_flaky_work() {
        let work = FlakyWork::new(2);
        assert!(work.call().is_err());
        assert!(work.clone().call().is_err());
        assert_eq!(work.call(), Ok(2));
        assert_eq!(work.calls(), 3);
    }
}
