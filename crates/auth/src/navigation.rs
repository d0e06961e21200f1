//! Navigation surface used by the failure path to leave protected content

use std::sync::{Mutex, PoisonError};

pub trait Navigator: Send + Sync {
    /// Path (plus query) of the page currently shown
    fn current_path(&self) -> String;

    /// Navigate to `url`, replacing the current history entry so there is no
    /// back path into the page being left
    fn replace(&self, url: &str);
}

/// History stack kept in memory.
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Mutex<Vec<String>>,
}

impl MemoryHistory {
    pub fn new(initial_path: &str) -> Self {
        Self {
            entries: Mutex::new(vec![initial_path.to_string()]),
        }
    }

    /// Ordinary navigation that keeps the previous entry reachable
    pub fn push(&self, path: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push(path.to_string());
    }

    /// Step back one entry; returns the new current path, or `None` when
    /// there is nothing to go back to
    pub fn back(&self) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() < 2 {
            return None;
        }
        entries.pop();
        entries.last().cloned()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for MemoryHistory {
    fn current_path(&self) -> String {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.last().cloned().unwrap_or_else(|| "/".to_string())
    }

    fn replace(&self, url: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.last_mut() {
            Some(top) => *top = url.to_string(),
            None => entries.push(url.to_string()),
        }
    }
}
