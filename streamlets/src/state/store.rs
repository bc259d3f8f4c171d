//! JSON-valued keyed state store.

use crate::errors::{Result, StreamletError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Keyed state backing aggregations.
///
/// Values are stored as JSON so one store can hold any serde type. A store
/// is scoped to one streamlet instance; the test harness resets and stops it
/// when each run ends so no state leaks between runs.
#[derive(Debug)]
pub struct StateStore {
    id: Uuid,
    entries: DashMap<String, serde_json::Value>,
    stopped: AtomicBool,
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: DashMap::new(),
            stopped: AtomicBool::new(false),
        }
    }
}

impl StateStore {
    /// Creates an empty, running store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique id of this store instance.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            Err(StreamletError::StateStore(format!("store {} is stopped", self.id)))
        } else {
            Ok(())
        }
    }

    /// Reads the value under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the store is stopped or the value does not decode as `A`.
    pub fn get<A: DeserializeOwned>(&self, key: &str) -> Result<Option<A>> {
        self.ensure_running()?;
        self.entries
            .get(key)
            .map(|value| serde_json::from_value(value.value().clone()))
            .transpose()
            .map_err(|e| StreamletError::StateStore(format!("key '{key}': {e}")))
    }

    /// Writes `value` under `key`.
    ///
    /// # Errors
    ///
    /// Fails if the store is stopped or the value cannot be encoded.
    pub fn put<A: Serialize>(&self, key: &str, value: &A) -> Result<()> {
        self.ensure_running()?;
        let encoded = serde_json::to_value(value)?;
        self.entries.insert(key.to_string(), encoded);
        Ok(())
    }

    /// Every entry decoded as `A`, sorted by key.
    ///
    /// # Errors
    ///
    /// Fails if the store is stopped or any value does not decode.
    pub fn entries<A: DeserializeOwned>(&self) -> Result<Vec<(String, A)>> {
        self.ensure_running()?;
        let mut raw: Vec<(String, serde_json::Value)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        raw.sort_by(|a, b| a.0.cmp(&b.0));
        raw.into_iter()
            .map(|(key, value)| {
                serde_json::from_value(value)
                    .map(|decoded| (key.clone(), decoded))
                    .map_err(|e| StreamletError::StateStore(format!("key '{key}': {e}")))
            })
            .collect()
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. The store stays usable.
    pub fn reset(&self) {
        self.entries.clear();
    }

    /// Stops the store; later reads and writes fail.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(store = %self.id, entries = self.entries.len(), "State store stopped");
        }
    }

    /// Returns true once [`StateStore::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let store = StateStore::new();
        store.put("a", &3_u64).unwrap();
        assert_eq!(store.get::<u64>("a").unwrap(), Some(3));
        assert_eq!(store.get::<u64>("b").unwrap(), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_entries_sorted() {
        let store = StateStore::new();
        store.put("b", &2_u64).unwrap();
        store.put("a", &1_u64).unwrap();
        let entries: Vec<(String, u64)> = store.entries().unwrap();
        assert_eq!(entries, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_decode_error() {
        let store = StateStore::new();
        store.put("a", &"text").unwrap();
        assert!(matches!(store.get::<u64>("a"), Err(StreamletError::StateStore(_))));
    }

    #[test]
    fn test_reset_and_stop() {
        let store = StateStore::new();
        store.put("a", &1_u64).unwrap();
        store.reset();
        assert!(store.is_empty());

        store.stop();
        assert!(store.is_stopped());
        assert!(store.put("a", &1_u64).is_err());
        assert!(store.get::<u64>("a").is_err());
    }
}
