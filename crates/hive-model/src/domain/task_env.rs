use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::KeyValue;

/// Extra environment passed to a worker process.
///
/// Config files write it as a plain mapping (`{ RUST_LOG: debug }`); it is kept as an ordered list so later entries override earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct TaskEnv(Vec<KeyValue>);

impl TaskEnv {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Value for `key`, last entry wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|kv| kv.key() == key)
            .map(|kv| kv.value())
    }

    pub fn push<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.0.push(KeyValue::new(key, value));
    }
}

impl From<BTreeMap<String, String>> for TaskEnv {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map.into_iter().map(|(k, v)| KeyValue::new(k, v)).collect())
    }
}

impl From<TaskEnv> for BTreeMap<String, String> {
    fn from(env: TaskEnv) -> Self {
        env.0
            .into_iter()
            .map(|kv| (kv.key().to_string(), kv.value().to_string()))
            .collect()
    }
}
