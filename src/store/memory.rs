//! In-process store. Same transactional contract as the SQLite store, with
//! injectable write failures for exercising the retry paths.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};

use crate::db::{Batch, Chunk, ChunkSummary, Session};

use super::SampleStore;

#[derive(Default)]
struct Tables {
    sessions: BTreeMap<String, Session>,
    chunks: BTreeMap<(String, u32), Chunk>,
    batches: Vec<Batch>,
    next_batch_id: i64,
}

impl Tables {
    fn write_chunk(&mut self, chunk: &Chunk) {
        let key = (chunk.session_id.clone(), chunk.chunk_index);
        let merged = match self.chunks.get(&key) {
            Some(existing) => chunk.merged_onto(existing),
            None => chunk.clone(),
        };
        self.chunks.insert(key, merged);
    }

    fn write_session(&mut self, session: &Session) {
        self.sessions
            .insert(session.session_id.clone(), session.clone());
    }

    fn require_session(&self, session_id: &str) -> Result<()> {
        if !self.sessions.contains_key(session_id) {
            bail!("unknown session {session_id}");
        }
        Ok(())
    }
}

/// Pending injected failures, consumed one per matching transaction.
#[derive(Default)]
struct Faults {
    batch_commits: u32,
    session_writes: u32,
    chunk_writes: u32,
}

fn consume(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Mutex<Faults>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` batch appends fail without writing anything.
    pub fn fail_next_batch_commits(&self, count: u32) {
        self.lock_faults().batch_commits = count;
    }

    /// The next `count` transactions that write a session row fail.
    pub fn fail_next_session_writes(&self, count: u32) {
        self.lock_faults().session_writes = count;
    }

    /// The next `count` transactions that write a chunk row fail.
    pub fn fail_next_chunk_writes(&self, count: u32) {
        self.lock_faults().chunk_writes = count;
    }

    /// Every batch, in commit order.
    pub fn all_batches(&self) -> Vec<Batch> {
        self.lock_tables().batches.clone()
    }

    pub fn batch_count(&self) -> usize {
        self.lock_tables().batches.len()
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks injected faults for a transaction touching the given
    /// collections. Runs before any table is touched, so a failure writes
    /// nothing.
    fn admit(&self, sessions: bool, chunks: bool, batches: bool) -> Result<()> {
        let mut faults = self.lock_faults();
        if batches && consume(&mut faults.batch_commits) {
            bail!("injected failure: batch commit");
        }
        if sessions && consume(&mut faults.session_writes) {
            bail!("injected failure: session write");
        }
        if chunks && consume(&mut faults.chunk_writes) {
            bail!("injected failure: chunk write");
        }
        Ok(())
    }
}

impl SampleStore for MemoryStore {
    async fn create_session(&self, session: &Session, first_chunk: &Chunk) -> Result<()> {
        self.admit(true, true, false)?;
        let mut tables = self.lock_tables();
        tables.write_session(session);
        tables.write_chunk(first_chunk);
        Ok(())
    }

    async fn put_session(&self, session: &Session) -> Result<()> {
        self.admit(true, false, false)?;
        self.lock_tables().write_session(session);
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.lock_tables().sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.lock_tables().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn most_recent_active_session(&self) -> Result<Option<Session>> {
        let tables = self.lock_tables();
        let best = tables
            .sessions
            .values()
            .filter(|session| session.active)
            .max_by_key(|session| session.last_activity())
            .cloned();
        Ok(best)
    }

    async fn enforce_single_active(&self, session_id: &str) -> Result<usize> {
        self.admit(true, false, false)?;
        let mut tables = self.lock_tables();
        let mut changed = 0;
        for session in tables.sessions.values_mut() {
            let should_be_active = session.session_id == session_id;
            if session.active != should_be_active {
                session.active = should_be_active;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.admit(false, true, false)?;
        let mut tables = self.lock_tables();
        tables.require_session(&chunk.session_id)?;
        tables.write_chunk(chunk);
        Ok(())
    }

    async fn get_chunk(&self, session_id: &str, chunk_index: u32) -> Result<Option<Chunk>> {
        let key = (session_id.to_string(), chunk_index);
        Ok(self.lock_tables().chunks.get(&key).cloned())
    }

    async fn list_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let tables = self.lock_tables();
        Ok(tables
            .chunks
            .values()
            .filter(|chunk| chunk.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn save_progress(&self, session: &Session, chunk: &Chunk) -> Result<()> {
        self.admit(true, true, false)?;
        let mut tables = self.lock_tables();
        tables.write_session(session);
        tables.write_chunk(chunk);
        Ok(())
    }

    async fn roll_chunk(&self, finalized: &Chunk, next: &Chunk, session: &Session) -> Result<()> {
        self.admit(true, true, false)?;
        let mut tables = self.lock_tables();
        tables.write_chunk(finalized);
        tables.write_chunk(next);
        tables.write_session(session);
        Ok(())
    }

    async fn add_batch(&self, batch: &Batch) -> Result<i64> {
        self.admit(false, false, true)?;
        if batch.records.is_empty() {
            bail!("refusing to append an empty batch");
        }
        let mut tables = self.lock_tables();
        tables.require_session(&batch.session_id)?;
        tables.next_batch_id += 1;
        let id = tables.next_batch_id;
        let mut stored = batch.clone();
        stored.id = Some(id);
        tables.batches.push(stored);
        Ok(id)
    }

    async fn list_batches(
        &self,
        session_id: &str,
        chunk_index: u32,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Batch>> {
        let after_id = after_id.unwrap_or(0);
        let tables = self.lock_tables();
        Ok(tables
            .batches
            .iter()
            .filter(|batch| {
                batch.session_id == session_id
                    && batch.chunk_index == chunk_index
                    && batch.id.unwrap_or(0) > after_id
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn chunk_summary(&self, session_id: &str, chunk_index: u32) -> Result<ChunkSummary> {
        let tables = self.lock_tables();
        let mut summary = ChunkSummary::default();
        for batch in tables
            .batches
            .iter()
            .filter(|batch| batch.session_id == session_id && batch.chunk_index == chunk_index)
        {
            summary.batch_count += 1;
            summary.row_count += batch.row_count();
            summary.last_sample_time = batch.last_sample_time();
        }
        Ok(summary)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut tables = self.lock_tables();
        *tables = Tables::default();
        Ok(())
    }
}
