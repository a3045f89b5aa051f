use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use relay_agent::{FinalState, Persona, TaskDiagnostics};

pub const DEFAULT_RETRY_CACHE_SIZE: usize = 25;

#[derive(Debug, Clone, PartialEq)]
/// Last known outcome of a task, kept for manual `/retry`.
pub struct RetryRecord {
    pub task_id: String,
    pub payload: String,
    pub persona: Persona,
    pub chat_hash: String,
    pub user_hash: String,
    pub last_final_state: FinalState,
    pub diagnostics: TaskDiagnostics,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug)]
/// Bounded FIFO of recent outcomes; the oldest record is evicted first.
pub struct RetryCache {
    capacity: usize,
    records: Mutex<VecDeque<RetryRecord>>,
}

impl Default for RetryCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_CACHE_SIZE)
    }
}

impl RetryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<RetryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, record: RetryRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent record for `task_id`.
    pub fn get(&self, task_id: &str) -> Option<RetryRecord> {
        self.records()
            .iter()
            .rev()
            .find(|record| record.task_id == task_id)
            .cloned()
    }

    pub fn clear(&self) {
        self.records().clear();
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
