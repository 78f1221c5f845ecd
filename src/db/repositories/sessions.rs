use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u32, to_u64},
    models::{Chunk, DeviceInfo, Session},
    Database,
};

use super::chunks::upsert_chunk;

const SESSION_COLUMNS: &str = "session_id, start_time, target_rate_hz, device, platform, screen_w, screen_h,
     active, current_chunk_index, current_sample_index, last_sample_time";

fn row_to_session(row: &Row) -> Result<Session> {
    let start_time: String = row.get("start_time")?;
    let last_sample_time: Option<String> = row.get("last_sample_time")?;
    let target_rate_hz: i64 = row.get("target_rate_hz")?;
    let screen_w: Option<i64> = row.get("screen_w")?;
    let screen_h: Option<i64> = row.get("screen_h")?;
    let current_chunk_index: i64 = row.get("current_chunk_index")?;
    let current_sample_index: i64 = row.get("current_sample_index")?;

    Ok(Session {
        session_id: row.get("session_id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        target_rate_hz: to_u32(target_rate_hz, "target_rate_hz")?,
        device: DeviceInfo {
            device: row.get("device")?,
            platform: row.get("platform")?,
            screen_w: screen_w.map(|w| to_u32(w, "screen_w")).transpose()?,
            screen_h: screen_h.map(|h| to_u32(h, "screen_h")).transpose()?,
        },
        active: row.get("active")?,
        current_chunk_index: to_u32(current_chunk_index, "current_chunk_index")?,
        current_sample_index: to_u64(current_sample_index, "current_sample_index")?,
        last_sample_time: parse_optional_datetime(last_sample_time, "last_sample_time")?,
    })
}

/// Insert or update by `session_id`. An upsert rather than `INSERT OR
/// REPLACE`, which would delete the row and cascade into its chunks.
pub(super) fn upsert_session(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (session_id, start_time, target_rate_hz, device, platform, screen_w, screen_h,
                               active, current_chunk_index, current_sample_index, last_sample_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(session_id) DO UPDATE SET
             target_rate_hz = excluded.target_rate_hz,
             active = excluded.active,
             current_chunk_index = excluded.current_chunk_index,
             current_sample_index = excluded.current_sample_index,
             last_sample_time = excluded.last_sample_time",
        params![
            session.session_id,
            format_datetime(&session.start_time),
            session.target_rate_hz,
            session.device.device,
            session.device.platform,
            session.device.screen_w,
            session.device.screen_h,
            session.active,
            session.current_chunk_index,
            to_i64(session.current_sample_index)?,
            session.last_sample_time.as_ref().map(format_datetime),
        ],
    )
    .with_context(|| format!("failed to write session {}", session.session_id))?;
    Ok(())
}

impl Database {
    /// Writes a new session and its first chunk in one transaction.
    pub async fn insert_session_with_chunk(&self, session: &Session, chunk: &Chunk) -> Result<()> {
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

    pub async fn upsert_session(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        self.execute(move |conn| upsert_session(conn, &session)).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY start_time DESC");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Active session with the latest observed activity (last committed
    /// sample, falling back to start time).
    pub async fn get_most_recent_active_session(&self) -> Result<Option<Session>> {
        self.execute(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE active = 1");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut best: Option<Session> = None;
            while let Some(row) = rows.next()? {
                let candidate = row_to_session(row)?;
                let newer = best
                    .as_ref()
                    .map_or(true, |current| candidate.last_activity() > current.last_activity());
                if newer {
                    best = Some(candidate);
                }
            }
            Ok(best)
        })
        .await
    }

    /// Sets `active` for `session_id` and clears it everywhere else.
    /// Returns how many rows changed.
    pub async fn set_single_active(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE sessions
                 SET active = CASE WHEN session_id = ?1 THEN 1 ELSE 0 END
                 WHERE active != CASE WHEN session_id = ?1 THEN 1 ELSE 0 END",
                params![session_id],
            )?;
            tx.commit()?;
            Ok(changed)
        })
        .await
    }

    /// Drops every session, chunk and batch.
    pub async fn clear_all(&self) -> Result<()> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM batches", [])?;
            tx.execute("DELETE FROM chunks", [])?;
            tx.execute("DELETE FROM sessions", [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
