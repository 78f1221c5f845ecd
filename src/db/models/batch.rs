//! Batch data model: an immutable, append-only group of Records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    /// Assigned by the store on append; `None` until committed.
    pub id: Option<i64>,
    pub session_id: String,
    pub chunk_index: u32,
    pub start_sample_index: u64,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(session_id: &str, chunk_index: u32, start_sample_index: u64) -> Self {
        Self {
            id: None,
            session_id: session_id.to_string(),
            chunk_index,
            start_sample_index,
            records: Vec::new(),
        }
    }

    pub fn row_count(&self) -> u64 {
        self.records.len() as u64
    }

    /// Sample index the next Record after this batch gets.
    pub fn next_sample_index(&self) -> u64 {
        self.start_sample_index + self.row_count()
    }

    pub fn last_sample_time(&self) -> Option<DateTime<Utc>> {
        self.records.last().and_then(Record::sampled_at)
    }
}
