use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ratelimit::{LimiterStats, LimiterStatsMap, RateLimitConfig, RateLimiter};
use crate::{ErrorKind, Result};

/// Directory of named [`RateLimiter`]s shared between components.
///
/// Two components that resolve the same name share one quota. The registry
/// is an explicit value, not a global: construct it once during setup and
/// hand clones to the components that need it (clones share the same entries).
///
/// # Architecture
///
/// - Lookups go straight to a `DashMap`, so admission on one limiter never
///   contends with lookups of unrelated ones
/// - Mutations (`register`, `remove`, `reset`) are serialized by a write lock
/// - Returned limiters are used without any further registry locking
///
/// ```
/// use flowgate_lib::ratelimit::{LimiterRegistry, RateLimitConfig};
///
/// # fn main() -> flowgate_lib::Result<()> {
/// let registry = LimiterRegistry::new();
/// registry.register("openai", RateLimitConfig::per_minute(5, 500))?;
///
/// let limiter = registry.get_or_create("openai", RateLimitConfig::concurrency(1))?;
/// assert_eq!(limiter.concurrency_cap(), 5);
/// assert!(registry.get("anthropic").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LimiterRegistry {
    /// Map of name to limiter
    limiters: Arc<DashMap<String, Arc<RateLimiter>>>,

    /// Serializes mutations of `limiters`
    writes: Arc<Mutex<()>>,
}

impl LimiterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new limiter under `name`
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RegistryKeyConflict`] if `name` is taken and
    /// [`ErrorKind::InvalidConfig`] if `config` is invalid
    pub fn register(&self, name: &str, config: RateLimitConfig) -> Result<Arc<RateLimiter>> {
        self.register_with(name, config, false)
    }

    /// Register a limiter under `name`, replacing an existing one if
    /// `overwrite` is set.
    ///
    /// Holders of the replaced limiter keep using it; only later lookups
    /// see the new one.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RegistryKeyConflict`] if `name` is taken and
    /// `overwrite` is not set, and [`ErrorKind::InvalidConfig`] if `config`
    /// is invalid
    pub fn register_with(
        &self,
        name: &str,
        config: RateLimitConfig,
        overwrite: bool,
    ) -> Result<Arc<RateLimiter>> {
        let _guard = self.write_lock();

        if self.limiters.contains_key(name) && !overwrite {
            return Err(ErrorKind::RegistryKeyConflict(name.to_string()));
        }

        let limiter = Arc::new(RateLimiter::new(config)?);
        if self
            .limiters
            .insert(name.to_string(), limiter.clone())
            .is_some()
        {
            log::warn!("Replaced rate limiter `{name}`");
        }
        Ok(limiter)
    }

    /// Get the limiter registered under `name`
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RegistryKeyError`] if `name` is not registered
    pub fn get(&self, name: &str) -> Result<Arc<RateLimiter>> {
        self.limiters
            .get(name)
            .map(|limiter| limiter.clone())
            .ok_or_else(|| ErrorKind::RegistryKeyError(name.to_string()))
    }

    /// Get the limiter registered under `name`, or register one with
    /// `config` if there is none.
    ///
    /// An existing limiter is returned as is, even if it was created with a
    /// different configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if a limiter has to be created
    /// and `config` is invalid
    pub fn get_or_create(&self, name: &str, config: RateLimitConfig) -> Result<Arc<RateLimiter>> {
        if let Some(limiter) = self.limiters.get(name) {
            return Ok(limiter.clone());
        }

        let _guard = self.write_lock();
        match self.limiters.entry(name.to_string()) {
            // Registered by someone else since the lookup above
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let limiter = Arc::new(RateLimiter::new(config)?);
                Ok(entry.insert(limiter).clone())
            }
        }
    }

    /// Check if `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.limiters.contains_key(name)
    }

    /// Remove the limiter registered under `name`
    ///
    /// Returns true if a limiter was removed, false if `name` was not registered.
    pub fn remove(&self, name: &str) -> bool {
        let _guard = self.write_lock();
        self.limiters.remove(name).is_some()
    }

    /// Remove every limiter
    pub fn reset(&self) {
        let _guard = self.write_lock();
        self.limiters.clear();
    }

    /// Registered names in lexicographic order
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.limiters.iter().map(|entry| entry.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// Snapshot of every registered name and the configuration its limiter
    /// was created with
    #[must_use]
    pub fn list_all(&self) -> BTreeMap<String, RateLimitConfig> {
        self.limiters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value().config()))
            .collect()
    }

    /// Statistics of the limiter registered under `name`
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::RegistryKeyError`] if `name` is not registered
    pub fn stats(&self, name: &str) -> Result<LimiterStats> {
        self.get(name).map(|limiter| limiter.stats())
    }

    /// Statistics of every registered limiter
    #[must_use]
    pub fn all_stats(&self) -> LimiterStatsMap {
        self.limiters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect::<std::collections::HashMap<_, _>>()
            .into()
    }

    /// Get the number of registered limiters
    #[must_use]
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Check if no limiter is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_register_then_get() {
        let registry = LimiterRegistry::new();
        let config = RateLimitConfig::per_minute(3, 100);
        registry.register("x", config).unwrap();

        let limiter = registry.get("x").unwrap();
        assert_eq!(*limiter.config(), config);
        assert!(registry.contains("x"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_name() {
        let registry = LimiterRegistry::new();
        assert_eq!(
            registry.get("y").unwrap_err(),
            ErrorKind::RegistryKeyError("y".into())
        );
        assert!(matches!(
            registry.stats("y"),
            Err(ErrorKind::RegistryKeyError(_))
        ));
    }

    #[test]
    fn test_register_conflict() {
        let registry = LimiterRegistry::new();
        registry.register("x", RateLimitConfig::concurrency(1)).unwrap();

        assert_eq!(
            registry
                .register("x", RateLimitConfig::concurrency(1))
                .unwrap_err(),
            ErrorKind::RegistryKeyConflict("x".into())
        );
    }

    #[test]
    fn test_register_overwrite() {
        let registry = LimiterRegistry::new();
        let old = registry.register("x", RateLimitConfig::concurrency(1)).unwrap();
        let new = registry
            .register_with("x", RateLimitConfig::concurrency(4), true)
            .unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(registry.get("x").unwrap().concurrency_cap(), 4);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_config_is_not_registered() {
        let registry = LimiterRegistry::new();
        assert!(matches!(
            registry.register("x", RateLimitConfig::concurrency(0)),
            Err(ErrorKind::InvalidConfig { .. })
        ));
        assert!(!registry.contains("x"));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = LimiterRegistry::new();
        let first = registry
            .get_or_create("shared", RateLimitConfig::concurrency(2))
            .unwrap();
        let second = registry
            .get_or_create("shared", RateLimitConfig::concurrency(9))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.concurrency_cap(), 2);
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = LimiterRegistry::new();
        let handle = registry.clone();
        handle.register("x", RateLimitConfig::default()).unwrap();
        assert!(registry.contains("x"));
    }

    #[test]
    fn test_listing() {
        let registry = LimiterRegistry::new();
        let slow = RateLimitConfig::concurrency(1).with_window(10, Duration::from_secs(1));
        registry.register("b", RateLimitConfig::default()).unwrap();
        registry.register("a", slow).unwrap();

        assert_eq!(registry.list_names(), vec!["a", "b"]);
        assert_eq!(
            registry.list_all(),
            BTreeMap::from([
                ("a".to_string(), slow),
                ("b".to_string(), RateLimitConfig::default()),
            ])
        );
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = LimiterRegistry::new();
        let limiter = registry.register("busy", RateLimitConfig::per_minute(2, 10)).unwrap();
        registry.register("idle", RateLimitConfig::default()).unwrap();

        let _held = limiter.acquire().await;
        limiter.acquire().await.release();

        let stats = registry.stats("busy").unwrap();
        assert_eq!(stats.holders, 1);
        assert_eq!(stats.current_window_count, 2);
        assert_eq!(stats.window_cap, Some(10));

        let all = registry.all_stats();
        assert_eq!(all.len(), 2);
        assert_eq!(all.sorted()[0].0, "busy");
    }

    #[test]
    fn test_remove_and_reset() {
        let registry = LimiterRegistry::new();
        registry.register("x", RateLimitConfig::default()).unwrap();
        registry.register("y", RateLimitConfig::default()).unwrap();

        assert!(registry.remove("x"));
        assert!(!registry.remove("x"));

        registry.reset();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("y"),
            Err(ErrorKind::RegistryKeyError(_))
        ));
    }
}
