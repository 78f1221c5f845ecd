//! In-memory pending batch between two flushes.

use chrono::{DateTime, Utc};

use crate::db::{Batch, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Buffered { pending: usize },
    /// Buffer is at capacity; the record was not taken.
    Backpressure,
}

#[derive(Debug)]
pub struct BatchBuffer {
    pending: Batch,
    capacity: usize,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Batch::new("", 0, 1),
            capacity: capacity.max(1),
        }
    }

    /// Points the buffer at a new chunk cursor. Any pending records are
    /// discarded, so callers flush first.
    pub fn reset_for(&mut self, session_id: &str, chunk_index: u32, start_sample_index: u64) {
        self.pending = Batch::new(session_id, chunk_index, start_sample_index);
    }

    pub fn len(&self) -> usize {
        self.pending.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Sample index the next appended record must carry.
    pub fn next_sample_index(&self) -> u64 {
        self.pending.next_sample_index()
    }

    pub fn append(&mut self, record: Record) -> AppendOutcome {
        if self.is_full() {
            return AppendOutcome::Backpressure;
        }
        debug_assert_eq!(record.sample_index, self.next_sample_index());
        self.pending.records.push(record);
        AppendOutcome::Buffered {
            pending: self.len(),
        }
    }

    /// The batch a flush would commit, if there is anything to commit.
    pub fn pending(&self) -> Option<&Batch> {
        if self.is_empty() {
            None
        } else {
            Some(&self.pending)
        }
    }

    /// Drops the records a successful commit persisted and moves the start
    /// index past them. Returns how many were released.
    pub fn mark_committed(&mut self) -> usize {
        let committed = self.len();
        let next_start = self.pending.next_sample_index();
        self.pending.records.clear();
        self.pending.start_sample_index = next_start;
        self.pending.id = None;
        committed
    }

    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.pending.last_sample_time()
    }
}
