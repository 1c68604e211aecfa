use serde::Serialize;

use crate::RateLimitSignal;

/// Terminal outcome of one dispatched unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<T, E> {
    /// The unit returned a value
    Completed(T),
    /// The unit returned an error that is not a rate limit
    Failed(E),
    /// The unit returned an error classified as a rate limit
    RateLimited {
        /// The error raised by the unit of work
        error: E,
        /// The classified throttling signal
        signal: RateLimitSignal,
    },
    /// The unit panicked; carries the panic message
    Panicked(String),
}

impl<T, E> ItemOutcome<T, E> {
    /// Check if the unit returned a value
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The value of a completed unit
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    /// The rate-limit signal of a throttled unit
    #[must_use]
    pub const fn signal(&self) -> Option<&RateLimitSignal> {
        match self {
            Self::RateLimited { signal, .. } => Some(signal),
            _ => None,
        }
    }
}

/// Index-aligned outcomes of one dispatch call.
///
/// `outcomes()[i]` belongs to the `i`-th input item, whatever order the
/// units finished in.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport<T, E> {
    outcomes: Vec<ItemOutcome<T, E>>,
    escalate: bool,
}

impl<T, E> DispatchReport<T, E> {
    pub(crate) const fn new(outcomes: Vec<ItemOutcome<T, E>>, escalate: bool) -> Self {
        Self { outcomes, escalate }
    }

    /// Outcomes in input order
    #[must_use]
    pub fn outcomes(&self) -> &[ItemOutcome<T, E>] {
        &self.outcomes
    }

    /// Number of units
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if the dispatch had no units
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of units that returned a value
    #[must_use]
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    /// Number of units that did not return a value, rate-limited and
    /// panicked ones included
    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.completed()
    }

    /// Number of units that were throttled
    #[must_use]
    pub fn rate_limited(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::RateLimited { .. }))
            .count()
    }

    /// Check if every unit completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Values of the completed units together with their input index
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.value().map(|value| (index, value)))
    }

    /// The first rate-limit signal, if the dispatcher propagates rate limits
    /// to an enclosing layer
    #[must_use]
    pub fn escalation(&self) -> Option<&RateLimitSignal> {
        if !self.escalate {
            return None;
        }
        self.outcomes.iter().find_map(ItemOutcome::signal)
    }

    /// Pass a propagated rate limit up as an error, e.g. with `?` inside an
    /// outer unit of work returning [`crate::Result`]
    ///
    /// # Errors
    ///
    /// Returns the signal from [`DispatchReport::escalation`] if there is one
    pub fn into_escalated(self) -> Result<Self, RateLimitSignal> {
        if let Some(signal) = self.escalation().cloned() {
            return Err(signal);
        }
        Ok(self)
    }

    /// Convert into one `Result` per unit.
    ///
    /// Panicked units have no error value and map to `Err(None)`.
    #[must_use]
    pub fn into_results(self) -> Vec<Result<T, Option<E>>> {
        self.outcomes
            .into_iter()
            .map(|outcome| match outcome {
                ItemOutcome::Completed(value) => Ok(value),
                ItemOutcome::Failed(error) | ItemOutcome::RateLimited { error, .. } => {
                    Err(Some(error))
                }
                ItemOutcome::Panicked(_) => Err(None),
            })
            .collect()
    }

    /// Get the stats of this report
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            completed: self.completed() as u64,
            failed: self.failed() as u64,
        }
    }
}

/// Completed and failed unit counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Units that returned a value
    pub completed: u64,
    /// Units that failed, were rate limited or panicked
    pub failed: u64,
}

impl DispatchStats {
    pub(crate) const fn add(&mut self, other: Self) {
        self.completed += other.completed;
        self.failed += other.failed;
    }

    /// Total number of units
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report(escalate: bool) -> DispatchReport<u32, String> {
        DispatchReport::new(
            vec![
                ItemOutcome::Completed(1),
                ItemOutcome::Failed("boom".into()),
                ItemOutcome::RateLimited {
                    error: "429".into(),
                    signal: RateLimitSignal::new("429"),
                },
                ItemOutcome::Panicked("oops".into()),
                ItemOutcome::Completed(5),
            ],
            escalate,
        )
    }

    #[test]
    fn test_counts() {
        let report = report(false);
        assert_eq!(report.len(), 5);
        assert_eq!(report.completed(), 2);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.rate_limited(), 1);
        assert!(!report.is_success());
        assert_eq!(
            report.stats(),
            DispatchStats {
                completed: 2,
                failed: 3
            }
        );
    }

    #[test]
    fn test_successes_keep_indices() {
        let report = report(false);
        let successes: Vec<_> = report.successes().collect();
        assert_eq!(successes, vec![(0, &1), (4, &5)]);
    }

    #[test]
    fn test_into_results() {
        assert_eq!(
            report(false).into_results(),
            vec![
                Ok(1),
                Err(Some("boom".to_string())),
                Err(Some("429".to_string())),
                Err(None),
                Ok(5),
            ]
        );
    }

    #[test]
    fn test_escalation_requires_propagation() {
        assert_eq!(report(false).escalation(), None);
        assert!(report(false).into_escalated().is_ok());

        assert_eq!(
            report(true).escalation(),
            Some(&RateLimitSignal::new("429"))
        );
        assert_eq!(
            report(true).into_escalated().unwrap_err(),
            RateLimitSignal::new("429")
        );
    }

    #[test]
    fn test_empty_report() {
        let report: DispatchReport<(), ()> = DispatchReport::new(Vec::new(), true);
        assert!(report.is_success());
        assert!(report.is_empty());
        assert_eq!(report.escalation(), None);
    }
}
