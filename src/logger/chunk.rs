//! Chunk rollover planning.

use chrono::{DateTime, Duration, Utc};

use crate::db::{Chunk, Session};

/// Rows a rollover writes in one transaction.
#[derive(Debug, Clone)]
pub struct ChunkRollover {
    pub finalized: Chunk,
    pub next: Chunk,
    pub session: Session,
}

/// A chunk is due once its age reaches `duration`. A clock that moved
/// backwards never makes a chunk due.
pub fn rollover_due(chunk_start: DateTime<Utc>, now: DateTime<Utc>, duration: Duration) -> bool {
    now.signed_duration_since(chunk_start) >= duration
}

/// Builds the rows for closing `chunk` at `now` and opening the next one.
/// The session cursor restarts at sample index 1 in the new chunk and
/// forgets its last sample time.
pub fn plan_rollover(session: &Session, chunk: &Chunk, now: DateTime<Utc>) -> ChunkRollover {
    let finalized = chunk.finalized_at(now, chunk.row_count);
    let next_index = chunk.chunk_index + 1;
    let next = Chunk::open(&session.session_id, next_index, now);

    let mut session = session.clone();
    session.current_chunk_index = next_index;
    session.current_sample_index = 0;
    session.last_sample_time = None;

    ChunkRollover {
        finalized,
        next,
        session,
    }
}
