//! Chunk data model: a bounded time-slice of a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub session_id: String,
    pub chunk_index: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub row_count: u64,
    pub finalized: bool,
}

impl Chunk {
    pub fn open(session_id: &str, chunk_index: u32, start_time: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            chunk_index,
            start_time,
            end_time: None,
            row_count: 0,
            finalized: false,
        }
    }

    pub fn finalized_at(&self, end_time: DateTime<Utc>, row_count: u64) -> Self {
        Self {
            end_time: Some(end_time),
            row_count,
            finalized: true,
            ..self.clone()
        }
    }

    /// Applies the one-way `finalized` rule when an update lands on an
    /// existing row: a finalized chunk never reopens and keeps its end time.
    pub fn merged_onto(&self, existing: &Chunk) -> Chunk {
        Chunk {
            end_time: self.end_time.or(existing.end_time),
            finalized: self.finalized || existing.finalized,
            ..self.clone()
        }
    }
}

/// What the committed Batches of one chunk add up to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub batch_count: u64,
    pub row_count: u64,
    pub last_sample_time: Option<DateTime<Utc>>,
}
