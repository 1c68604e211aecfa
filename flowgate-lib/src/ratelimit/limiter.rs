use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

use crate::Result;
use crate::ratelimit::window::Window;
use crate::ratelimit::{LimiterStats, RateLimitConfig};

/// Dual-gate admission primitive.
///
/// A unit of work is admitted once *both* of these hold at the same time:
/// - fewer than `concurrency` units are currently admitted, and
/// - fewer than `window_cap` admissions happened during the trailing `window`
///   (skipped when the window cap is unlimited).
///
/// Concurrency slots are handed out by a fair [`Semaphore`], so callers get
/// a slot in the order they asked for one and a caller that releases and
/// immediately re-acquires queues behind everyone already waiting. The
/// holder of a slot then waits for room in the window, and the window check
/// and the admission happen atomically under a private lock.
///
/// There is no deadline; wrap [`RateLimiter::acquire`] in
/// [`tokio::time::timeout`] if one is needed.
///
/// # Examples
///
/// ```
/// use flowgate_lib::ratelimit::{RateLimitConfig, RateLimiter};
///
/// # #[tokio::main]
/// # async fn main() -> flowgate_lib::Result<()> {
/// // At most 5 requests in flight, 60 per minute
/// let limiter = RateLimiter::new(RateLimitConfig::per_minute(5, 60))?;
///
/// let answer = limiter.run(async { 42 }).await;
/// assert_eq!(answer, 42);
/// assert_eq!(limiter.holders(), 0);
/// assert_eq!(limiter.current_window_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    /// Configuration the limiter was created with
    config: RateLimitConfig,

    /// Free concurrency slots, one permit each
    slots: Semaphore,

    /// Holder count and window, guarded together so admission is atomic
    state: Mutex<LimiterState>,

    /// Wakes slot holders waiting on a full window when it is cleared
    window_reset: Notify,
}

#[derive(Debug)]
struct LimiterState {
    concurrency_cap: usize,
    holders: usize,
    /// Slots to retire on release because the cap was lowered below the
    /// number of slots in use
    debt: usize,
    window: Window,
    total_admissions: u64,
}

enum Admission {
    Admitted,
    WindowFull { until: Instant },
}

impl LimiterState {
    fn try_admit(&mut self, now: Instant, window_cap: Option<usize>) -> Admission {
        self.window.evict_expired(now);
        if let Some(cap) = window_cap
            && self.window.len() >= cap
            && let Some(until) = self.window.next_expiry()
        {
            return Admission::WindowFull { until };
        }

        self.holders += 1;
        self.window.push(now);
        self.total_admissions += 1;
        Admission::Admitted
    }
}

impl RateLimiter {
    /// Create a limiter from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::InvalidConfig`] if a cap is zero or the window is empty
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: RateLimitConfig) -> Self {
        Self {
            config,
            slots: Semaphore::new(config.concurrency),
            state: Mutex::new(LimiterState {
                concurrency_cap: config.concurrency,
                holders: 0,
                debt: 0,
                window: Window::new(config.window),
                total_admissions: 0,
            }),
            window_reset: Notify::new(),
        }
    }

    // The guarded state is never left half-updated, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until both gates admit the caller.
    ///
    /// The returned [`Permit`] releases the concurrency slot when dropped.
    /// Dropping this future before it resolves leaves the limiter untouched.
    pub async fn acquire(&self) -> Permit<'_> {
        self.slots
            .acquire()
            .await
            // SAFETY: this should not panic as we never close the semaphore
            .expect("Semaphore was closed unexpectedly")
            .forget();
        let slot = Slot { limiter: self };

        loop {
            // Register interest before checking so a reset in between is not lost
            let reset = self.window_reset.notified();
            tokio::pin!(reset);
            reset.as_mut().enable();

            let admission = self.lock().try_admit(Instant::now(), self.config.window_cap);
            match admission {
                Admission::Admitted => return Permit { slot },
                Admission::WindowFull { until } => {
                    tokio::select! {
                        () = &mut reset => {}
                        () = tokio::time::sleep_until(until) => {}
                    }
                }
            }
        }
    }

    /// Admit the caller only if both gates are open right now
    #[must_use]
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        self.slots.try_acquire().ok()?.forget();
        let slot = Slot { limiter: self };

        let admission = self.lock().try_admit(Instant::now(), self.config.window_cap);
        match admission {
            Admission::Admitted => Some(Permit { slot }),
            Admission::WindowFull { .. } => None,
        }
    }

    /// Run `work` while holding a permit; the slot is released on every exit path
    pub async fn run<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        let _permit = self.acquire().await;
        work.await
    }

    fn release(&self) {
        let mut state = self.lock();
        state.holders = state.holders.saturating_sub(1);
    }

    fn return_slot(&self) {
        let mut state = self.lock();
        if state.debt > 0 {
            state.debt -= 1;
        } else {
            self.slots.add_permits(1);
        }
    }

    /// Change the live concurrency cap.
    ///
    /// Admitted holders are never revoked: after lowering the cap, new
    /// admissions wait until enough holders have released.
    pub(crate) fn set_concurrency_cap(&self, concurrency_cap: usize) {
        let concurrency_cap = concurrency_cap.max(1);
        let mut state = self.lock();
        let current = state.concurrency_cap;
        state.concurrency_cap = concurrency_cap;

        if concurrency_cap > current {
            let grow = concurrency_cap - current;
            let repaid = grow.min(state.debt);
            state.debt -= repaid;
            self.slots.add_permits(grow - repaid);
        } else if concurrency_cap < current {
            let shrink = current - concurrency_cap;
            let retired = self.slots.forget_permits(shrink);
            state.debt += shrink - retired;
        }
    }

    /// Clear the throughput window and the admission counter.
    ///
    /// Units that are currently admitted keep their slots.
    pub fn reset(&self) {
        {
            let mut state = self.lock();
            state.window.clear();
            state.total_admissions = 0;
        }
        self.window_reset.notify_waiters();
    }

    /// Configuration the limiter was created with
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Live concurrency cap
    #[must_use]
    pub fn concurrency_cap(&self) -> usize {
        self.lock().concurrency_cap
    }

    /// Throughput cap per window, `None` for unlimited
    #[must_use]
    pub const fn window_cap(&self) -> Option<usize> {
        self.config.window_cap
    }

    /// Length of the throughput window
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.config.window
    }

    /// Get the number of currently admitted units
    #[must_use]
    pub fn holders(&self) -> usize {
        self.lock().holders
    }

    /// Get the number of concurrency slots that are free right now
    #[must_use]
    pub fn available_permits(&self) -> usize {
        let state = self.lock();
        state.concurrency_cap.saturating_sub(state.holders)
    }

    /// Number of admissions inside the trailing window
    #[must_use]
    pub fn current_window_count(&self) -> usize {
        self.lock().window.count_at(Instant::now())
    }

    /// Point-in-time statistics
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        let state = self.lock();
        LimiterStats {
            concurrency_cap: state.concurrency_cap,
            window_cap: self.config.window_cap,
            window: self.config.window,
            holders: state.holders,
            current_window_count: state.window.count_at(Instant::now()),
            total_admissions: state.total_admissions,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_valid(RateLimitConfig::default())
    }
}

/// A concurrency slot taken from the semaphore, given back on drop
#[derive(Debug)]
struct Slot<'a> {
    limiter: &'a RateLimiter,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.limiter.return_slot();
    }
}

/// RAII guard for one admission to a [`RateLimiter`].
///
/// The concurrency slot is released when the permit is dropped: on normal
/// return, early return through `?`, panic unwinding, or cancellation of
/// the task holding it. The window entry stays until it expires.
#[must_use = "dropping the permit releases the slot immediately"]
#[derive(Debug)]
pub struct Permit<'a> {
    slot: Slot<'a>,
}

impl Permit<'_> {
    /// Release the slot now instead of at the end of the scope
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        // The slot field is dropped after this, handing the slot back
        self.slot.limiter.release();
    }
}
