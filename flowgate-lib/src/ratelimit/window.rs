use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// A sliding window of admission timestamps.
///
/// Timestamps are appended in monotonic order and dropped lazily once they
/// are `duration` or more in the past, so [`Window::len`] is the number of
/// admissions inside the trailing window after the last eviction.
#[derive(Debug, Clone)]
pub(crate) struct Window {
    timestamps: VecDeque<Instant>,
    duration: Duration,
}

impl Window {
    /// Create an empty window spanning `duration`
    #[must_use]
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            timestamps: VecDeque::new(),
            duration,
        }
    }

    /// Record an admission at `at`
    pub(crate) fn push(&mut self, at: Instant) {
        self.timestamps.push_back(at);
    }

    /// Drop every timestamp that has left the window as of `now`
    pub(crate) fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) < self.duration {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    /// Number of timestamps that are still inside the window as of `now`,
    /// without evicting anything
    #[must_use]
    pub(crate) fn count_at(&self, now: Instant) -> usize {
        self.timestamps
            .iter()
            .filter(|&&ts| now.saturating_duration_since(ts) < self.duration)
            .count()
    }

    /// The instant at which the oldest timestamp leaves the window
    #[must_use]
    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        self.timestamps.front().map(|&oldest| oldest + self.duration)
    }

    /// Get the number of timestamps currently stored
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub(crate) fn clear(&mut self) {
        self.timestamps.clear();
    }
}
