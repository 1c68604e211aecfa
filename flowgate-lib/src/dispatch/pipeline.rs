use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dispatch::Params;

/// One independent run of a multi-step pipeline.
///
/// An instance owns all of its mutable execution state and is consumed by
/// [`PipelineInstance::run`], so two concurrently running instances never
/// share step objects.
#[async_trait]
pub trait PipelineInstance: Send + Sized + 'static {
    /// Value produced by a successful run
    type Output: Send + 'static;
    /// Error returned by a failed run, classified like any unit error
    type Error: Send + 'static;

    /// Run the pipeline to completion.
    ///
    /// Writes to `shared` should use keys derived from the instance's
    /// parameters so items don't overwrite each other.
    async fn run(self, shared: SharedStore) -> Result<Self::Output, Self::Error>;
}

/// Immutable definition that stamps out a fresh [`PipelineInstance`] per item
pub trait PipelineTemplate {
    /// The pipeline stamped out per item
    type Instance: PipelineInstance;

    /// Build an instance for one item; must not mutate the template
    fn instantiate(&self, params: Params) -> Self::Instance;
}

/// Concurrent key/value store shared by every instance of one dispatch.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct SharedStore(Arc<DashMap<String, Value>>);

impl SharedStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one for `key`
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// A copy of the value stored under `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.get(key).map(|value| value.clone())
    }

    /// Check if `key` is set
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Remove and return the value stored under `key`
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.remove(key).map(|(_, value)| value)
    }

    /// Get the number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the store has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ordered copy of every entry
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.0
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clones_share_entries() {
        let store = SharedStore::new();
        let clone = store.clone();
        clone.insert("doc-1", json!({"summary": "short"}));

        assert_eq!(store.get("doc-1"), Some(json!({"summary": "short"})));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove("doc-1"), Some(json!({"summary": "short"})));
        assert!(clone.is_empty());
    }
}
