//! Persistent store seam.
//!
//! Three collections (Sessions, Chunks, Batches) with lookups by session and
//! by (session, chunk). Every method is one transaction: it either fully
//! commits or leaves the store untouched.

use std::future::Future;

use anyhow::Result;

use crate::db::{Batch, Chunk, ChunkSummary, Database, Session};

mod memory;

pub use memory::MemoryStore;

pub trait SampleStore: Send + Sync + 'static {
    /// New session row together with its first open chunk.
    fn create_session(
        &self,
        session: &Session,
        first_chunk: &Chunk,
    ) -> impl Future<Output = Result<()>> + Send;

    fn put_session(&self, session: &Session) -> impl Future<Output = Result<()>> + Send;

    fn get_session(&self, session_id: &str) -> impl Future<Output = Result<Option<Session>>> + Send;

    /// Newest first by start time.
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<Session>>> + Send;

    /// Active session with the latest `last_sample_time`, or `start_time`
    /// when nothing was committed yet.
    fn most_recent_active_session(&self) -> impl Future<Output = Result<Option<Session>>> + Send;

    /// Marks `session_id` active and every other session inactive.
    /// Returns the number of rows changed; 0 means nothing needed fixing.
    fn enforce_single_active(&self, session_id: &str) -> impl Future<Output = Result<usize>> + Send;

    fn put_chunk(&self, chunk: &Chunk) -> impl Future<Output = Result<()>> + Send;

    fn get_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
    ) -> impl Future<Output = Result<Option<Chunk>>> + Send;

    /// Ascending by chunk index.
    fn list_chunks(&self, session_id: &str) -> impl Future<Output = Result<Vec<Chunk>>> + Send;

    /// Session counters plus the open chunk's row count after a flush.
    fn save_progress(
        &self,
        session: &Session,
        chunk: &Chunk,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Finalize `finalized`, open `next`, persist `session`.
    fn roll_chunk(
        &self,
        finalized: &Chunk,
        next: &Chunk,
        session: &Session,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Appends a batch; returns its id. Ids increase in commit order.
    fn add_batch(&self, batch: &Batch) -> impl Future<Output = Result<i64>> + Send;

    /// Batches of one chunk in commit order, strictly after `after_id`.
    fn list_batches(
        &self,
        session_id: &str,
        chunk_index: u32,
        after_id: Option<i64>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Batch>>> + Send;

    fn chunk_summary(
        &self,
        session_id: &str,
        chunk_index: u32,
    ) -> impl Future<Output = Result<ChunkSummary>> + Send;

    /// Full reset.
    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send;
}

impl SampleStore for Database {
    async fn create_session(&self, session: &Session, first_chunk: &Chunk) -> Result<()> {
        self.insert_session_with_chunk(session, first_chunk).await
    }

    async fn put_session(&self, session: &Session) -> Result<()> {
        self.upsert_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Database::get_session(self, session_id).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        Database::list_sessions(self).await
    }

    async fn most_recent_active_session(&self) -> Result<Option<Session>> {
        self.get_most_recent_active_session().await
    }

    async fn enforce_single_active(&self, session_id: &str) -> Result<usize> {
        self.set_single_active(session_id).await
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<()> {
        self.upsert_chunk(chunk).await
    }

    async fn get_chunk(&self, session_id: &str, chunk_index: u32) -> Result<Option<Chunk>> {
        Database::get_chunk(self, session_id, chunk_index).await
    }

    async fn list_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        Database::list_chunks(self, session_id).await
    }

    async fn save_progress(&self, session: &Session, chunk: &Chunk) -> Result<()> {
        Database::save_progress(self, session, chunk).await
    }

    async fn roll_chunk(&self, finalized: &Chunk, next: &Chunk, session: &Session) -> Result<()> {
        Database::roll_chunk(self, finalized, next, session).await
    }

    async fn add_batch(&self, batch: &Batch) -> Result<i64> {
        self.insert_batch(batch).await
    }

    async fn list_batches(
        &self,
        session_id: &str,
        chunk_index: u32,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Batch>> {
        self.get_batches_page(session_id, chunk_index, after_id, limit)
            .await
    }

    async fn chunk_summary(&self, session_id: &str, chunk_index: u32) -> Result<ChunkSummary> {
        self.get_chunk_summary(session_id, chunk_index).await
    }

    async fn clear_all(&self) -> Result<()> {
        Database::clear_all(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DeviceInfo, Record, SampleContext};
    use crate::sensors::SensorSnapshot;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 20, 14, 0, 0).unwrap()
    }

    fn session(id: &str, start: DateTime<Utc>) -> Session {
        Session::new(
            id.to_string(),
            start,
            50,
            DeviceInfo {
                device: Some("Pixel 8".into()),
                platform: Some("android".into()),
                screen_w: Some(1080),
                screen_h: Some(2400),
            },
        )
    }

    fn batch(session: &Session, chunk_index: u32, start: u64, count: u64) -> Batch {
        let mut batch = Batch::new(&session.session_id, chunk_index, start);
        for index in start..start + count {
            batch.records.push(Record::from_snapshot(
                SampleContext {
                    session,
                    sample_index: index,
                    at: t0() + Duration::milliseconds(index as i64 * 20),
                    dt_ms: 20,
                },
                &SensorSnapshot::default(),
            ));
        }
        batch
    }

    async fn sessions_and_activity<S: SampleStore>(store: &S) {
        let old = session("s_old", t0() - Duration::hours(2));
        let mut idle = session("s_idle", t0() - Duration::hours(1));
        let fresh = session("s_fresh", t0());
        for s in [&old, &idle, &fresh] {
            store
                .create_session(s, &Chunk::open(&s.session_id, 1, s.start_time))
                .await
                .unwrap();
        }

        let listed: Vec<String> = store
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(listed, vec!["s_fresh", "s_idle", "s_old"]);

        // Latest sample beats latest start.
        idle.last_sample_time = Some(t0() + Duration::minutes(5));
        store.put_session(&idle).await.unwrap();
        let best = store.most_recent_active_session().await.unwrap().unwrap();
        assert_eq!(best.session_id, "s_idle");
        assert_eq!(best.device, idle.device);

        assert_eq!(store.enforce_single_active("s_fresh").await.unwrap(), 2);
        assert_eq!(store.enforce_single_active("s_fresh").await.unwrap(), 0);
        let best = store.most_recent_active_session().await.unwrap().unwrap();
        assert_eq!(best.session_id, "s_fresh");

        assert!(store.get_session("s_missing").await.unwrap().is_none());
    }

    async fn chunks_finalize_once<S: SampleStore>(store: &S) {
        let mut s = session("s_chunks", t0());
        let first = Chunk::open("s_chunks", 1, t0());
        store.create_session(&s, &first).await.unwrap();

        let rolled_at = t0() + Duration::minutes(30);
        s.current_chunk_index = 2;
        store
            .roll_chunk(
                &first.finalized_at(rolled_at, 40),
                &Chunk::open("s_chunks", 2, rolled_at),
                &s,
            )
            .await
            .unwrap();

        // A late write from before the rollover must not reopen chunk 1.
        store
            .put_chunk(&Chunk {
                row_count: 40,
                ..first.clone()
            })
            .await
            .unwrap();

        let chunks = store.list_chunks("s_chunks").await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].finalized);
        assert_eq!(chunks[0].end_time, Some(rolled_at));
        assert_eq!(chunks[0].row_count, 40);
        assert!(!chunks[1].finalized);
        assert_eq!(chunks[1].end_time, None);

        let stored = store.get_session("s_chunks").await.unwrap().unwrap();
        assert_eq!(stored.current_chunk_index, 2);
        assert!(store.get_chunk("s_chunks", 3).await.unwrap().is_none());
    }

    async fn batches_page_in_commit_order<S: SampleStore>(store: &S) {
        let s = session("s_batches", t0());
        store
            .create_session(&s, &Chunk::open("s_batches", 1, t0()))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(store.add_batch(&batch(&s, 1, n * 10 + 1, 10)).await.unwrap());
        }
        store.add_batch(&batch(&s, 2, 1, 3)).await.unwrap();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        let first_page = store.list_batches("s_batches", 1, None, 2).await.unwrap();
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].start_sample_index, 1);
        let rest = store
            .list_batches("s_batches", 1, first_page[1].id, 10)
            .await
            .unwrap();
        assert_eq!(
            rest.iter().map(|b| b.start_sample_index).collect::<Vec<_>>(),
            vec![21, 31, 41]
        );
        assert_eq!(rest[2].records, batch(&s, 1, 41, 10).records);

        let summary = store.chunk_summary("s_batches", 1).await.unwrap();
        assert_eq!(summary.batch_count, 5);
        assert_eq!(summary.row_count, 50);
        assert_eq!(
            summary.last_sample_time,
            Some(t0() + Duration::milliseconds(50 * 20))
        );
        let empty = store.chunk_summary("s_batches", 9).await.unwrap();
        assert_eq!(empty, ChunkSummary::default());

        let orphan = batch(&session("s_nobody", t0()), 1, 1, 1);
        assert!(store.add_batch(&orphan).await.is_err());

        store.clear_all().await.unwrap();
        assert!(store.list_sessions().await.unwrap().is_empty());
        assert!(store
            .list_batches("s_batches", 1, None, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn memory_store_contract() {
        let store = MemoryStore::new();
        sessions_and_activity(&store).await;
        chunks_finalize_once(&store).await;
        batches_page_in_commit_order(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let store = Database::in_memory().unwrap();
        sessions_and_activity(&store).await;
        chunks_finalize_once(&store).await;
        batches_page_in_commit_order(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.sqlite3");
        let s = session("s_disk", t0());
        {
            let db = Database::new(path.clone()).unwrap();
            db.create_session(&s, &Chunk::open("s_disk", 1, t0()))
                .await
                .unwrap();
            SampleStore::add_batch(&db, &batch(&s, 1, 1, 4)).await.unwrap();
        }

        let db = Database::new(path).unwrap();
        assert_eq!(
            SampleStore::get_session(&db, "s_disk").await.unwrap(),
            Some(s)
        );
        let summary = SampleStore::chunk_summary(&db, "s_disk", 1).await.unwrap();
        assert_eq!(summary.row_count, 4);
    }

    #[tokio::test]
    async fn injected_failures_write_nothing() {
        let store = MemoryStore::new();
        let mut s = session("s_fault", t0());
        let first = Chunk::open("s_fault", 1, t0());
        store.create_session(&s, &first).await.unwrap();

        store.fail_next_chunk_writes(1);
        s.current_sample_index = 10;
        let progressed = Chunk {
            row_count: 10,
            ..first.clone()
        };
        assert!(store.save_progress(&s, &progressed).await.is_err());
        let stored = store.get_session("s_fault").await.unwrap().unwrap();
        assert_eq!(stored.current_sample_index, 0);

        store.save_progress(&s, &progressed).await.unwrap();
        let stored = store.get_session("s_fault").await.unwrap().unwrap();
        assert_eq!(stored.current_sample_index, 10);
    }
}
