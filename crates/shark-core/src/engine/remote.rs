use super::error::EngineError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const DEFAULT_POLL: Duration = Duration::from_millis(500);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A key-value table that one thread publishes into and others read from.
///
/// Readers that need an entry before it exists poll with [`get_or_wait`](Self::get_or_wait),
/// which gives up after a bounded timeout.
#[derive(Debug)]
pub struct SharedTable<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for SharedTable<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> SharedTable<K, V>
where
    K: Eq + Hash + Display,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key` and returns the entry it replaced.
    pub fn publish(&self, key: K, value: V) -> Option<V> {
        trace!("Publishing shared entry '{}'.", key);
        self.entries.write().insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the entry for `key`, sleeping `poll` between lookups until it shows up or
    /// `timeout` has passed.
    pub fn get_or_wait(&self, key: &K, poll: Duration, timeout: Duration) -> Result<V, EngineError> {
        let start = Instant::now();
        loop {
            if let Some(value) = self.get(key) {
                return Ok(value);
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(EngineError::RemoteTimeout {
                    key: key.to_string(),
                    waited,
                });
            }
            debug!("Waiting for shared entry '{}' ({:?} so far).", key, waited);
            std::thread::sleep(poll.min(timeout - waited).max(Duration::from_millis(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn published_entries_are_returned_immediately() {
        let table = SharedTable::new();
        assert!(table.is_empty());
        assert_eq!(table.publish("complex".to_string(), 3), None);
        assert_eq!(table.publish("complex".to_string(), 4), Some(3));
        let value = table
            .get_or_wait(&"complex".to_string(), DEFAULT_POLL, Duration::ZERO)
            .unwrap();
        assert_eq!(value, 4);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn waiting_reader_sees_a_late_publish() {
        let table = Arc::new(SharedTable::new());
        let writer = table.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            writer.publish("ligand".to_string(), vec![1, 2, 3]);
        });
        let value = table
            .get_or_wait(
                &"ligand".to_string(),
                Duration::from_millis(5),
                Duration::from_secs(10),
            )
            .unwrap();
        handle.join().unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }

    #[test]
    fn missing_entry_times_out() {
        let table: SharedTable<String, u32> = SharedTable::new();
        let result = table.get_or_wait(
            &"protein".to_string(),
            Duration::from_millis(5),
            Duration::from_millis(30),
        );
        match result {
            Err(EngineError::RemoteTimeout { key, waited }) => {
                assert_eq!(key, "protein");
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
    }
}
