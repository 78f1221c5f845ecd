//! Crash recovery: rebuild the in-memory cursor from durably committed rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::config::RecoveryMode;
use crate::db::{Chunk, Session};
use crate::store::SampleStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumeInfo {
    pub session_id: String,
    pub target_rate_hz: u32,
    pub chunk_index: u32,
    pub row_count: u64,
    pub next_sample_index: u64,
    pub chunk_start: DateTime<Utc>,
    pub last_sample_time: Option<DateTime<Utc>>,
}

/// What recovery hands back to the logger when a session can continue.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub session: Session,
    pub chunk: Chunk,
    pub info: ResumeInfo,
}

pub async fn recover<S: SampleStore>(store: &S, mode: RecoveryMode) -> Result<Option<Recovered>> {
    let Some(mut session) = store
        .most_recent_active_session()
        .await
        .context("failed to look up active session")?
    else {
        return Ok(None);
    };

    let chunk = store
        .get_chunk(&session.session_id, session.current_chunk_index)
        .await
        .context("failed to load current chunk")?;

    let mut chunk = match chunk {
        Some(chunk) if !chunk.finalized => chunk,
        Some(_) => {
            warn!(
                "session {} points at finalized chunk {}, not resumable",
                session.session_id, session.current_chunk_index
            );
            return Ok(None);
        }
        None => {
            warn!(
                "session {} points at missing chunk {}, not resumable",
                session.session_id, session.current_chunk_index
            );
            return Ok(None);
        }
    };

    if mode == RecoveryMode::RecomputeFromBatches {
        reconcile_counters(store, &mut session, &mut chunk).await?;
    }

    let info = ResumeInfo {
        session_id: session.session_id.clone(),
        target_rate_hz: session.target_rate_hz,
        chunk_index: session.current_chunk_index,
        row_count: chunk.row_count,
        next_sample_index: session.next_sample_index(),
        chunk_start: chunk.start_time,
        last_sample_time: session.last_sample_time,
    };

    info!(
        "recovered session {} at chunk {}, next sample {}",
        info.session_id, info.chunk_index, info.next_sample_index
    );

    Ok(Some(Recovered {
        session,
        chunk,
        info,
    }))
}

/// Replaces cached counters with what the committed Batches add up to, and
/// writes the corrected values back when they differ.
async fn reconcile_counters<S: SampleStore>(
    store: &S,
    session: &mut Session,
    chunk: &mut Chunk,
) -> Result<()> {
    let summary = store
        .chunk_summary(&session.session_id, chunk.chunk_index)
        .await
        .context("failed to summarize committed batches")?;

    let last_sample_time = summary.last_sample_time;

    if summary.row_count == session.current_sample_index
        && summary.row_count == chunk.row_count
        && last_sample_time == session.last_sample_time
    {
        return Ok(());
    }

    warn!(
        "session {} chunk {}: cached rows session={} chunk={}, batches hold {}; repairing",
        session.session_id,
        chunk.chunk_index,
        session.current_sample_index,
        chunk.row_count,
        summary.row_count
    );

    let mut repaired_session = session.clone();
    repaired_session.current_sample_index = summary.row_count;
    repaired_session.last_sample_time = last_sample_time;
    let repaired_chunk = Chunk {
        row_count: summary.row_count,
        ..chunk.clone()
    };

    store
        .save_progress(&repaired_session, &repaired_chunk)
        .await
        .context("failed to write repaired counters")?;

    *session = repaired_session;
    *chunk = repaired_chunk;
    Ok(())
}
