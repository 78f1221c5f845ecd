use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::{format_datetime, parse_optional_datetime, to_i64, to_u32, to_u64},
    models::{Batch, ChunkSummary, Record},
    Database,
};

impl Database {
    /// Appends a batch and returns its id. Ids are strictly increasing.
    pub async fn insert_batch(&self, batch: &Batch) -> Result<i64> {
        let records_json =
            serde_json::to_string(&batch.records).context("failed to serialize batch records")?;
        let session_id = batch.session_id.clone();
        let chunk_index = batch.chunk_index;
        let start_sample_index = to_i64(batch.start_sample_index)?;
        let row_count = to_i64(batch.row_count())?;
        let last_sample_time = batch.last_sample_time().as_ref().map(format_datetime);

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO batches (session_id, chunk_index, start_sample_index, row_count,
                                      last_sample_time, records_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    chunk_index,
                    start_sample_index,
                    row_count,
                    last_sample_time,
                    records_json,
                ],
            )
            .with_context(|| format!("failed to append batch for chunk {chunk_index}"))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// One page of a chunk's batches in commit order, starting after
    /// `after_id`.
    pub async fn get_batches_page(
        &self,
        session_id: &str,
        chunk_index: u32,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Batch>> {
        let session_id = session_id.to_string();
        let after_id = after_id.unwrap_or(0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, chunk_index, start_sample_index, records_json
                 FROM batches
                 WHERE session_id = ?1 AND chunk_index = ?2 AND id > ?3
                 ORDER BY id ASC
                 LIMIT ?4",
            )?;

            let mut rows = stmt.query(params![session_id, chunk_index, after_id, limit])?;
            let mut batches = Vec::new();
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let chunk_index: i64 = row.get(2)?;
                let start_sample_index: i64 = row.get(3)?;
                let records_json: String = row.get(4)?;
                let records: Vec<Record> = serde_json::from_str(&records_json)
                    .with_context(|| format!("failed to decode records of batch {id}"))?;

                batches.push(Batch {
                    id: Some(id),
                    session_id: row.get(1)?,
                    chunk_index: to_u32(chunk_index, "chunk_index")?,
                    start_sample_index: to_u64(start_sample_index, "start_sample_index")?,
                    records,
                });
            }
            Ok(batches)
        })
        .await
    }

    /// Totals derived from batch metadata alone, without decoding records.
    pub async fn get_chunk_summary(
        &self,
        session_id: &str,
        chunk_index: u32,
    ) -> Result<ChunkSummary> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let (batch_count, row_count): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(row_count), 0)
                 FROM batches
                 WHERE session_id = ?1 AND chunk_index = ?2",
                params![session_id, chunk_index],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let last_sample_time: Option<String> = conn
                .query_row(
                    "SELECT last_sample_time
                     FROM batches
                     WHERE session_id = ?1 AND chunk_index = ?2
                     ORDER BY id DESC
                     LIMIT 1",
                    params![session_id, chunk_index],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            Ok(ChunkSummary {
                batch_count: to_u64(batch_count, "batch_count")?,
                row_count: to_u64(row_count, "row_count")?,
                last_sample_time: parse_optional_datetime(last_sample_time, "last_sample_time")?,
            })
        })
        .await
    }
}
