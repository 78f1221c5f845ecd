//! Reader side: turns committed Batches back into NDJSON files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::db::{Batch, Record};
use crate::store::SampleStore;

const DEFAULT_PAGE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub lines: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedFile {
    pub chunk_index: u32,
    pub path: PathBuf,
    pub summary: ExportSummary,
}

/// `session_<id>_chunk<NN>_<YYYYMMDD_HHMMSS>Z.ndjson`
pub fn chunk_file_name(session_id: &str, chunk_index: u32, created: DateTime<Utc>) -> String {
    format!(
        "session_{session_id}_chunk{chunk_index:02}_{}Z.ndjson",
        created.format("%Y%m%d_%H%M%S")
    )
}

pub struct ChunkExporter<'a, S: SampleStore> {
    store: &'a S,
    page_size: usize,
}

impl<'a, S: SampleStore> ChunkExporter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Visits every Batch of one chunk in commit order, one page at a time.
    async fn for_each_batch<F>(&self, session_id: &str, chunk_index: u32, mut visit: F) -> Result<()>
    where
        F: FnMut(&Batch) -> Result<()>,
    {
        let mut after_id = None;
        loop {
            let page = self
                .store
                .list_batches(session_id, chunk_index, after_id, self.page_size)
                .await
                .with_context(|| {
                    format!("failed to read batches of {session_id} chunk {chunk_index}")
                })?;

            for batch in &page {
                visit(batch)?;
            }

            match page.last() {
                Some(last) if page.len() == self.page_size => after_id = last.id,
                _ => return Ok(()),
            }
        }
    }

    /// Writes one JSON object per Record, newline-terminated.
    pub async fn write_chunk<W: Write>(
        &self,
        session_id: &str,
        chunk_index: u32,
        out: &mut W,
    ) -> Result<ExportSummary> {
        let mut summary = ExportSummary::default();
        self.for_each_batch(session_id, chunk_index, |batch| {
            for record in &batch.records {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                out.write_all(&line)?;
                summary.lines += 1;
                summary.bytes += line.len() as u64;
            }
            Ok(())
        })
        .await?;
        out.flush()?;
        Ok(summary)
    }

    pub async fn collect_records(&self, session_id: &str, chunk_index: u32) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        self.for_each_batch(session_id, chunk_index, |batch| {
            records.extend(batch.records.iter().cloned());
            Ok(())
        })
        .await?;
        Ok(records)
    }

    /// Writes every chunk of a session as its own file under `dir`.
    pub async fn export_session(
        &self,
        session_id: &str,
        dir: &Path,
        created: DateTime<Utc>,
    ) -> Result<Vec<ExportedFile>> {
        let chunks = self.store.list_chunks(session_id).await?;
        if chunks.is_empty() {
            bail!("no chunks found for session {session_id}");
        }

        let mut exported = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let path = dir.join(chunk_file_name(session_id, chunk.chunk_index, created));
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let summary = self
                .write_chunk(session_id, chunk.chunk_index, &mut writer)
                .await?;
            info!(
                "exported chunk {} ({} lines, {} bytes) to {}",
                chunk.chunk_index,
                summary.lines,
                summary.bytes,
                path.display()
            );
            exported.push(ExportedFile {
                chunk_index: chunk.chunk_index,
                path,
                summary,
            });
        }
        Ok(exported)
    }
}

/// All Records of one chunk, concatenated in commit order.
pub async fn collect_chunk_records<S: SampleStore>(
    store: &S,
    session_id: &str,
    chunk_index: u32,
) -> Result<Vec<Record>> {
    ChunkExporter::new(store)
        .collect_records(session_id, chunk_index)
        .await
}
