use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u32, to_u64},
    models::{Chunk, Session},
    Database,
};

use super::sessions::upsert_session;

fn row_to_chunk(row: &Row) -> Result<Chunk> {
    let chunk_index: i64 = row.get("chunk_index")?;
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let row_count: i64 = row.get("row_count")?;

    Ok(Chunk {
        session_id: row.get("session_id")?,
        chunk_index: to_u32(chunk_index, "chunk_index")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_optional_datetime(end_time, "end_time")?,
        row_count: to_u64(row_count, "row_count")?,
        finalized: row.get("finalized")?,
    })
}

/// Insert or update by `(session_id, chunk_index)`. `finalized` only moves
/// false -> true and a recorded `end_time` is never cleared.
pub(super) fn upsert_chunk(conn: &Connection, chunk: &Chunk) -> Result<()> {
    conn.execute(
        "INSERT INTO chunks (session_id, chunk_index, start_time, end_time, row_count, finalized)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id, chunk_index) DO UPDATE SET
             start_time = excluded.start_time,
             end_time = COALESCE(excluded.end_time, chunks.end_time),
             row_count = excluded.row_count,
             finalized = MAX(chunks.finalized, excluded.finalized)",
        params![
            chunk.session_id,
            chunk.chunk_index,
            format_datetime(&chunk.start_time),
            chunk.end_time.as_ref().map(format_datetime),
            to_i64(chunk.row_count)?,
            chunk.finalized,
        ],
    )
    .with_context(|| {
        format!(
            "failed to write chunk {} of session {}",
            chunk.chunk_index, chunk.session_id
        )
    })?;
    Ok(())
}

impl Database {
    pub async fn upsert_chunk(&self, chunk: &Chunk) -> Result<()> {
        let chunk = chunk.clone();
        self.execute(move |conn| upsert_chunk(conn, &chunk)).await
    }

    pub async fn get_chunk(&self, session_id: &str, chunk_index: u32) -> Result<Option<Chunk>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, chunk_index, start_time, end_time, row_count, finalized
                 FROM chunks
                 WHERE session_id = ?1 AND chunk_index = ?2",
            )?;
            let chunk = stmt
                .query_row(params![session_id, chunk_index], |row| Ok(row_to_chunk(row)))
                .optional()?
                .transpose()?;
            Ok(chunk)
        })
        .await
    }

    pub async fn list_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, chunk_index, start_time, end_time, row_count, finalized
                 FROM chunks
                 WHERE session_id = ?1
                 ORDER BY chunk_index ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut chunks = Vec::new();
            while let Some(row) = rows.next()? {
                chunks.push(row_to_chunk(row)?);
            }
            Ok(chunks)
        })
        .await
    }

    /// Session counters and the open chunk's row count, written together.
    pub async fn save_progress(&self, session: &Session, chunk: &Chunk) -> Result<()> {
        let session = session.clone();
        let chunk = chunk.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            upsert_session(&tx, &session)?;
            upsert_chunk(&tx, &chunk)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Finalizes the current chunk, opens the next one and moves the
    /// session cursor onto it, all in one transaction.
    pub async fn roll_chunk(
        &self,
        finalized: &Chunk,
        next: &Chunk,
        session: &Session,
    ) -> Result<()> {
        let finalized = finalized.clone();
        let next = next.clone();
        let session = session.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            upsert_chunk(&tx, &finalized)?;
            upsert_chunk(&tx, &next)?;
            upsert_session(&tx, &session)?;
            tx.commit()
                .with_context(|| format!("failed to commit rollover to chunk {}", next.chunk_index))?;
            Ok(())
        })
        .await
    }
}
