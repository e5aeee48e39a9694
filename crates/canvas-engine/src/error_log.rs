//! Bounded log of classified block failures
//!
//! Shared by every run of an engine. Once full, the oldest entry is
//! dropped for each new one.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::classify::{ErrorInfo, ErrorKind};
use crate::config::DEFAULT_ERROR_LOG_CAPACITY;

pub struct ErrorLog {
    entries: Mutex<VecDeque<ErrorInfo>>,
    capacity: usize,
}

impl ErrorLog {
    /// Create a log holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn record(&self, info: ErrorInfo) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(info);
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<ErrorInfo> {
        self.entries.lock().iter().cloned().collect()
    }

    /// The `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<ErrorInfo> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn for_execution(&self, execution_id: &str) -> Vec<ErrorInfo> {
        self.entries
            .lock()
            .iter()
            .filter(|info| info.context.execution_id == execution_id)
            .cloned()
            .collect()
    }

    /// Number of logged entries per error category
    pub fn counts_by_kind(&self) -> HashMap<ErrorKind, usize> {
        let mut counts = HashMap::new();
        for info in self.entries.lock().iter() {
            *counts.entry(info.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LOG_CAPACITY)
    }
}
