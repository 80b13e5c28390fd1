//! Where decoded values and the staleness flag are published.

use std::collections::BTreeMap;

pub trait StateStore {
    fn set_info(&mut self, key: &str, value: String);
    /// Published data can no longer be trusted.
    fn data_stale(&mut self);
    fn data_ok(&mut self);
}

/// In-memory store, enough for the probe binary and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    info: BTreeMap<String, String>,
    stale: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.info.get(key).map(String::as_str)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

impl StateStore for MemoryStore {
    fn set_info(&mut self, key: &str, value: String) {
        self.info.insert(key.to_owned(), value);
    }

    fn data_stale(&mut self) {
        self.stale = true;
    }

    fn data_ok(&mut self) {
        self.stale = false;
    }
}
