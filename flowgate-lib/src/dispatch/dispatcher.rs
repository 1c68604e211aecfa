use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{JoinError, JoinSet};

use crate::Result;
use crate::dispatch::{
    DispatchReport, DispatchStats, ItemOutcome, Params, PipelineInstance, PipelineTemplate,
    SharedStore,
};
use crate::ratelimit::{
    AdaptiveConfig, AdaptiveController, Classifier, LimiterRegistry, Permit, RateLimitConfig,
    RateLimiter,
};

/// What every unit passes through before it runs
#[derive(Debug)]
enum Gate<E> {
    Fixed(Arc<RateLimiter>),
    Adaptive(Arc<AdaptiveController<E>>),
}

impl<E> Clone for Gate<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(limiter) => Self::Fixed(limiter.clone()),
            Self::Adaptive(controller) => Self::Adaptive(controller.clone()),
        }
    }
}

impl<E> Gate<E> {
    async fn acquire(&self) -> Permit<'_> {
        match self {
            Self::Fixed(limiter) => limiter.acquire().await,
            Self::Adaptive(controller) => controller.acquire().await,
        }
    }

    /// Turn the unit's result into its outcome, feeding an adaptive gate
    fn settle<T>(&self, classifier: &Classifier<E>, result: std::result::Result<T, E>) -> ItemOutcome<T, E> {
        let signal = match self {
            Self::Adaptive(controller) => controller.feedback(&result),
            Self::Fixed(_) => result.as_ref().err().and_then(|error| classifier.classify(error)),
        };
        match (result, signal) {
            (Ok(value), _) => ItemOutcome::Completed(value),
            (Err(error), Some(signal)) => ItemOutcome::RateLimited { error, signal },
            (Err(error), None) => ItemOutcome::Failed(error),
        }
    }

    fn escalates(&self) -> bool {
        match self {
            Self::Fixed(_) => false,
            Self::Adaptive(controller) => controller.config().propagate_rate_limit,
        }
    }

    fn limiter(&self) -> &RateLimiter {
        match self {
            Self::Fixed(limiter) => limiter,
            Self::Adaptive(controller) => controller.limiter(),
        }
    }

    fn reset(&self) {
        match self {
            Self::Fixed(limiter) => limiter.reset(),
            Self::Adaptive(controller) => controller.reset(),
        }
    }
}

/// Runs many independent units of work concurrently under one gate.
///
/// Each unit gets its own merged [`Params`], waits for admission, runs, and
/// releases its slot on every exit path. A failing or panicking unit is
/// recorded at its index and never cancels its siblings. With an adaptive
/// gate, each outcome is reported to the [`AdaptiveController`] before the
/// slot is released.
///
/// `E` is the error type of the units of work.
///
/// # Examples
///
/// ```
/// use flowgate_lib::dispatch::{ItemOutcome, ParallelDispatcher, Params};
/// use flowgate_lib::ratelimit::RateLimitConfig;
///
/// # #[tokio::main]
/// # async fn main() -> flowgate_lib::Result<()> {
/// let dispatcher = ParallelDispatcher::<String>::fixed(RateLimitConfig::concurrency(2))?;
///
/// let base = Params::new().with("model", "small");
/// let items = (0..3).map(|id| Params::new().with("id", id));
///
/// let report = dispatcher
///     .dispatch(&base, items, |params| async move {
///         let id = params.get("id").and_then(|id| id.as_u64()).unwrap_or_default();
///         if id == 1 { Err("bad input".to_string()) } else { Ok(id * 10) }
///     })
///     .await;
///
/// assert_eq!(report.completed(), 2);
/// assert_eq!(report.outcomes()[1], ItemOutcome::Failed("bad input".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ParallelDispatcher<E> {
    gate: Gate<E>,

    /// Tags rate-limited outcomes under a fixed gate.
    /// Adaptive gates use the controller's own classifier.
    classifier: Classifier<E>,

    /// Cumulative counts across dispatch calls
    stats: Mutex<DispatchStats>,
}

impl<E: Send + 'static> ParallelDispatcher<E> {
    /// Dispatch under a fixed concurrency and throughput limit
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::InvalidConfig`] if `config` is invalid
    pub fn fixed(config: RateLimitConfig) -> Result<Self> {
        Ok(Self::with_limiter(Arc::new(RateLimiter::new(config)?)))
    }

    /// Dispatch under an existing limiter, e.g. one shared with other components
    #[must_use]
    pub fn with_limiter(limiter: Arc<RateLimiter>) -> Self {
        Self::with_gate(Gate::Fixed(limiter))
    }

    /// Dispatch under the limiter registered as `name`
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::RegistryKeyError`] if `name` is not registered
    pub fn shared(registry: &LimiterRegistry, name: &str) -> Result<Self> {
        registry.get(name).map(Self::with_limiter)
    }

    /// Dispatch under an existing adaptive controller
    #[must_use]
    pub fn with_controller(controller: Arc<AdaptiveController<E>>) -> Self {
        Self::with_gate(Gate::Adaptive(controller))
    }

    fn with_gate(gate: Gate<E>) -> Self {
        Self {
            gate,
            classifier: Classifier::never(),
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    /// Classify failures under a fixed gate, so throttled units are reported
    /// as [`ItemOutcome::RateLimited`]. Has no effect on adaptive gates.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier<E>) -> Self {
        self.classifier = classifier;
        self
    }

    fn lock_stats(&self) -> MutexGuard<'_, DispatchStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` once per item with `base` merged into the item's parameters.
    ///
    /// Every unit is spawned as its own task, so `work` must produce
    /// `'static` futures (move owned data, or `Arc`s, into them).
    pub async fn dispatch<T, I, F, Fut>(&self, base: &Params, items: I, work: F) -> DispatchReport<T, E>
    where
        I: IntoIterator<Item = Params>,
        F: Fn(Params) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let units: Vec<_> = items
            .into_iter()
            .map(|item| work(Params::merged(base, &item)))
            .collect();
        self.run_units(units).await
    }

    /// Run an independent copy of `template` per item.
    ///
    /// Each copy is instantiated from the immutable template with its own
    /// merged parameters. All copies write to the same `shared` store.
    pub async fn dispatch_instances<P, I>(
        &self,
        template: &P,
        base: &Params,
        items: I,
        shared: &SharedStore,
    ) -> DispatchReport<<P::Instance as PipelineInstance>::Output, E>
    where
        P: PipelineTemplate,
        P::Instance: PipelineInstance<Error = E>,
        I: IntoIterator<Item = Params>,
    {
        let units: Vec<_> = items
            .into_iter()
            .map(|item| {
                template
                    .instantiate(Params::merged(base, &item))
                    .run(shared.clone())
            })
            .collect();
        self.run_units(units).await
    }

    async fn run_units<T, Fut>(&self, units: Vec<Fut>) -> DispatchReport<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
    {
        let escalate = self.gate.escalates();
        if units.is_empty() {
            return DispatchReport::new(Vec::new(), escalate);
        }

        let total = units.len();
        log::debug!("Dispatching {total} units");

        let mut tasks = JoinSet::new();
        let mut indices = HashMap::with_capacity(total);
        for (index, unit) in units.into_iter().enumerate() {
            let gate = self.gate.clone();
            let classifier = self.classifier.clone();
            let handle = tasks.spawn(async move {
                let _permit = gate.acquire().await;
                let result = unit.await;
                gate.settle(&classifier, result)
            });
            indices.insert(handle.id(), index);
        }

        let mut outcomes: Vec<Option<ItemOutcome<T, E>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, outcome)) => (id, outcome),
                Err(error) => {
                    let id = error.id();
                    let message = panic_message(error);
                    log::warn!("Unit of work panicked: {message}");
                    (id, ItemOutcome::Panicked(message))
                }
            };
            if let Some(slot) = indices.get(&id).and_then(|&index| outcomes.get_mut(index)) {
                *slot = Some(outcome);
            }
        }

        let outcomes: Vec<_> = outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or_else(|| ItemOutcome::Panicked("task lost".to_string())))
            .collect();
        let report = DispatchReport::new(outcomes, escalate);

        let stats = report.stats();
        log::debug!(
            "Dispatched {total} units: {} completed, {} failed ({} rate limited)",
            stats.completed,
            stats.failed,
            report.rate_limited()
        );
        self.lock_stats().add(stats);
        report
    }

    /// Cumulative counts over every dispatch since creation or the last reset
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        *self.lock_stats()
    }

    /// Clear the cumulative counts and reset the gate
    pub fn reset(&self) {
        *self.lock_stats() = DispatchStats::default();
        self.gate.reset();
    }

    /// The limiter every unit is admitted through
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        self.gate.limiter()
    }

    /// The adaptive controller, if the gate is adaptive
    #[must_use]
    pub fn controller(&self) -> Option<&AdaptiveController<E>> {
        match &self.gate {
            Gate::Adaptive(controller) => Some(controller),
            Gate::Fixed(_) => None,
        }
    }
}

impl<E: Display + Send + 'static> ParallelDispatcher<E> {
    /// Dispatch under an adaptive controller that detects rate limits from
    /// the units' error messages
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErrorKind::InvalidConfig`] if `config` is invalid
    pub fn adaptive(config: AdaptiveConfig) -> Result<Self> {
        Ok(Self::with_controller(Arc::new(AdaptiveController::new(config)?)))
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
