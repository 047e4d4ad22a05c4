use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// Tracks which sessions have a check running. A session may hold at
/// most one permit at a time.
#[derive(Debug, Clone, Default)]
pub struct InflightGuard {
    inner: Arc<Mutex<HashSet<String>>>,
}

#[derive(Debug)]
pub struct InflightPermit {
    inner: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InflightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: &str) -> Option<InflightPermit> {
        let mut guard = self.inner.lock();
        if !guard.insert(key.to_string()) {
            return None;
        }

        Some(InflightPermit {
            inner: self.inner.clone(),
            key: key.to_string(),
        })
    }

    pub fn active(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for InflightPermit {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.key);
    }
}
