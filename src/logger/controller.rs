use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::clock::{Clock, SystemClock};
use crate::config::LoggerConfig;
use crate::db::{Chunk, DeviceInfo, Record, SampleContext, Session};
use crate::sensors::SnapshotProvider;
use crate::store::SampleStore;

use super::buffer::AppendOutcome;
use super::chunk::{plan_rollover, rollover_due};
use super::recovery::{recover, ResumeInfo};
use super::session::{enforce_single_active, resume, start_new};
use super::state::{LoggerState, PublicState};

// Sample ticks run at up to 100 Hz; keep their logging switchable.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushOutcome {
    pub committed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; nothing sampled.
    Idle,
    Sampled { sample_index: u64, flushed: bool },
    /// Buffer at capacity; this tick's sample was skipped.
    Backpressure,
}

/// The session/chunk/batch state machine. Every operation takes the state
/// lock for its whole duration, store writes included, so flushes,
/// rollovers and stops never interleave.
///
/// Lifecycle changes (session loaded or started, flush, rollover, stop,
/// clear) are published to [`SensorLogger::subscribe`] receivers. Plain
/// sample ticks are not.
pub struct SensorLogger<S: SampleStore> {
    state: Arc<Mutex<LoggerState>>,
    state_tx: Arc<watch::Sender<PublicState>>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sensors: Arc<dyn SnapshotProvider>,
    config: Arc<LoggerConfig>,
}

impl<S: SampleStore> Clone for SensorLogger<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: Arc::clone(&self.state_tx),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            sensors: Arc::clone(&self.sensors),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: SampleStore> SensorLogger<S> {
    pub fn new(
        store: Arc<S>,
        config: LoggerConfig,
        clock: Arc<dyn Clock>,
        sensors: Arc<dyn SnapshotProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let state = LoggerState::new(config.max_buffered_samples, config.achieved_rate_window());
        let initial = state.public_view(clock.now(), sensors.snapshot().wake_lock);
        let (state_tx, _) = watch::channel(initial);
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            state_tx: Arc::new(state_tx),
            store,
            clock,
            sensors,
            config: Arc::new(config),
        })
    }

    pub fn with_system_clock(
        store: Arc<S>,
        config: LoggerConfig,
        sensors: Arc<dyn SnapshotProvider>,
    ) -> Result<Self> {
        Self::new(store, config, Arc::new(SystemClock), sensors)
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Receiver that sees the latest published [`PublicState`].
    pub fn subscribe(&self) -> watch::Receiver<PublicState> {
        self.state_tx.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Loads the most recent active session from the store so the next
    /// `start` continues it. Meant to run once, before the first `start`.
    pub async fn restore_if_needed(&self) -> Result<Option<ResumeInfo>> {
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            bail!("a session is already loaded; restore runs before start");
        }

        let Some(recovered) = recover(&*self.store, self.config.recovery_mode).await? else {
            info!("no resumable session, next start begins a new one");
            return Ok(None);
        };

        state.adopt(recovered.session, recovered.chunk);
        self.publish(&state);
        Ok(Some(recovered.info))
    }

    /// Starts sampling. Continues the loaded session if there is one,
    /// otherwise creates a new one. No-op while already running.
    pub async fn start(&self, target_rate_hz: u32, device: DeviceInfo) -> Result<()> {
        self.config.ensure_rate_allowed(target_rate_hz)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.running {
            log_debug!("start ignored, already running");
            return Ok(());
        }
        if state.stop_pending {
            bail!("previous stop did not complete; call stop again before starting");
        }

        let now = self.clock.now();
        let session_id = match state.session.as_mut() {
            Some(session) => {
                resume(&*self.store, session, target_rate_hz).await?;
                session.session_id.clone()
            }
            None => {
                let (session, chunk) =
                    start_new(&*self.store, target_rate_hz, device, now).await?;
                let session_id = session.session_id.clone();
                state.adopt(session, chunk);
                session_id
            }
        };

        enforce_single_active(&*self.store, &session_id).await?;

        state.running = true;
        state.backpressured = false;
        state.rate.reset(now);
        self.publish(state);
        Ok(())
    }

    /// Stops sampling, flushes what is buffered and marks the session
    /// inactive. If any write fails the error is returned, buffered records
    /// are kept, and calling `stop` again retries.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let result = self.stop_locked(&mut guard).await;
        self.publish(&guard);
        result
    }

    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        let mut guard = self.state.lock().await;
        self.flush_locked(&mut guard).await
    }

    /// Runs the rollover check against the current clock.
    pub async fn rollover_if_due(&self) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let now = self.clock.now();
        self.rollover_locked(&mut guard, now).await
    }

    /// One sampler cadence step: rollover check, record, threshold flush.
    /// Storage failures are logged and retried on a later tick.
    pub async fn sample_tick(&self) -> TickOutcome {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.running {
            return TickOutcome::Idle;
        }

        let now = self.clock.now();
        if let Err(err) = self.rollover_locked(state, now).await {
            log_warn!("chunk rollover failed, retrying next tick: {err:?}");
        }

        let mut flush_attempted = false;
        if state.buffer.is_full() {
            flush_attempted = true;
            self.try_flush(state).await;
        }

        if state.buffer.is_full() {
            if !state.backpressured {
                state.backpressured = true;
                log_warn!(
                    "buffer full at {} samples, sampling paused until a flush succeeds",
                    state.buffer.len()
                );
            }
            return TickOutcome::Backpressure;
        }
        if state.backpressured {
            state.backpressured = false;
            log_info!("buffer drained, sampling resumed");
        }

        let Some(session) = state.session.as_ref() else {
            return TickOutcome::Idle;
        };
        let sample_index = state.buffer.next_sample_index();
        let dt_ms = state
            .last_sample_time
            .map(|previous| now.signed_duration_since(previous).num_milliseconds())
            .unwrap_or(0);
        let record = Record::from_snapshot(
            SampleContext {
                session,
                sample_index,
                at: now,
                dt_ms,
            },
            &self.sensors.snapshot(),
        );

        if state.buffer.append(record) == AppendOutcome::Backpressure {
            return TickOutcome::Backpressure;
        }
        state.last_sample_time = Some(now);
        state.rate.record(now);

        let mut flushed = false;
        if !flush_attempted && state.buffer.len() >= self.config.flush_every_samples {
            flushed = self.try_flush(state).await;
        }

        TickOutcome::Sampled {
            sample_index,
            flushed,
        }
    }

    pub async fn public_state(&self) -> PublicState {
        let state = self.state.lock().await;
        self.view(&state)
    }

    /// Stops any running session, then wipes every session, chunk and batch.
    pub async fn clear_all_data(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        self.stop_locked(&mut guard).await?;
        self.store
            .clear_all()
            .await
            .context("failed to clear stored data")?;
        guard.clear();
        self.publish(&guard);
        info!("all logged data cleared");
        Ok(())
    }

    async fn stop_locked(&self, state: &mut LoggerState) -> Result<()> {
        if !state.running && !state.stop_pending {
            return Ok(());
        }
        state.running = false;
        state.stop_pending = true;

        self.flush_locked(state)
            .await
            .context("final flush on stop failed")?;

        let session = state
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("stop without a loaded session"))?;
        let stopped = Session {
            active: false,
            ..session.clone()
        };
        self.store
            .put_session(&stopped)
            .await
            .context("failed to mark session inactive")?;

        info!(
            "session {} stopped at chunk {} with {} rows",
            stopped.session_id, stopped.current_chunk_index, stopped.current_sample_index
        );
        state.session = Some(stopped);
        state.stop_pending = false;
        Ok(())
    }

    async fn try_flush(&self, state: &mut LoggerState) -> bool {
        match self.flush_locked(state).await {
            Ok(outcome) => outcome.committed > 0,
            Err(err) => {
                log_warn!("flush failed, keeping {} buffered samples: {err:?}", state.buffer.len());
                false
            }
        }
    }

    /// Commits the buffered records as one batch, then advances the session
    /// and chunk counters. The buffer is released as soon as the batch
    /// commits; a failed counter update is retried by the next flush.
    async fn flush_locked(&self, state: &mut LoggerState) -> Result<FlushOutcome> {
        let Some(batch) = state.buffer.pending() else {
            if state.progress_dirty {
                self.save_progress(state).await?;
            }
            return Ok(FlushOutcome { committed: 0 });
        };

        let rows = batch.row_count();
        let last_sample_time = batch.last_sample_time();
        self.store
            .add_batch(batch)
            .await
            .context("failed to commit batch")?;

        let committed = state.buffer.mark_committed();
        let (session, chunk) = cursor_mut(state)?;
        session.current_sample_index += rows;
        session.last_sample_time = last_sample_time.or(session.last_sample_time);
        chunk.row_count = session.current_sample_index;
        let (chunk_index, chunk_rows) = (chunk.chunk_index, chunk.row_count);
        state.progress_dirty = true;

        self.save_progress(state).await?;
        self.publish(state);

        log_debug!("flushed {committed} records, chunk {chunk_index} now at {chunk_rows} rows");
        Ok(FlushOutcome { committed })
    }

    async fn save_progress(&self, state: &mut LoggerState) -> Result<()> {
        let (session, chunk) = cursor_mut(state)?;
        self.store
            .save_progress(session, chunk)
            .await
            .context("failed to save session progress")?;
        state.progress_dirty = false;
        Ok(())
    }

    /// Finalizes the open chunk and opens the next one once the chunk has
    /// lasted the configured duration. Buffered records are flushed into the
    /// closing chunk first; if that flush fails nothing is rolled.
    async fn rollover_locked(&self, state: &mut LoggerState, now: DateTime<Utc>) -> Result<bool> {
        let Some(chunk) = state.chunk.as_ref() else {
            return Ok(false);
        };
        if !rollover_due(chunk.start_time, now, self.config.chunk_duration()) {
            return Ok(false);
        }

        self.flush_locked(state)
            .await
            .context("flush before rollover failed")?;

        let (session, chunk) = cursor_mut(state)?;
        let plan = plan_rollover(session, chunk, now);
        self.store
            .roll_chunk(&plan.finalized, &plan.next, &plan.session)
            .await
            .context("failed to roll chunk")?;

        info!(
            "session {}: chunk {} finalized with {} rows, chunk {} opened",
            plan.session.session_id,
            plan.finalized.chunk_index,
            plan.finalized.row_count,
            plan.next.chunk_index
        );
        state.adopt(plan.session, plan.next);
        self.publish(state);
        Ok(true)
    }

    fn view(&self, state: &LoggerState) -> PublicState {
        state.public_view(self.clock.now(), self.sensors.snapshot().wake_lock)
    }

    fn publish(&self, state: &LoggerState) {
        self.state_tx.send_replace(self.view(state));
    }
}

fn cursor_mut(state: &mut LoggerState) -> Result<(&mut Session, &mut Chunk)> {
    match (state.session.as_mut(), state.chunk.as_mut()) {
        (Some(session), Some(chunk)) => Ok((session, chunk)),
        _ => Err(anyhow!("no session loaded")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::Batch;
    use crate::sensors::SensorSnapshot;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    struct Harness {
        logger: SensorLogger<MemoryStore>,
        store: MemoryStore,
        clock: ManualClock,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 14, 6, 30, 0).unwrap()
    }

    fn harness_on(store: MemoryStore, clock: ManualClock, config: LoggerConfig) -> Harness {
        let snapshot = SensorSnapshot {
            ax: Some(0.1),
            motion_ok: true,
            ..SensorSnapshot::default()
        };
        let logger = SensorLogger::new(
            Arc::new(store.clone()),
            config,
            Arc::new(clock.clone()),
            Arc::new(snapshot),
        )
        .unwrap();
        Harness {
            logger,
            store,
            clock,
        }
    }

    fn harness(config: LoggerConfig) -> Harness {
        harness_on(MemoryStore::new(), ManualClock::new(t0()), config)
    }

    impl Harness {
        async fn ticks(&self, count: usize) -> Vec<TickOutcome> {
            let mut outcomes = Vec::with_capacity(count);
            for _ in 0..count {
                self.clock.advance(Duration::milliseconds(20));
                outcomes.push(self.logger.sample_tick().await);
            }
            outcomes
        }
    }

    fn indices(batches: &[Batch]) -> Vec<u64> {
        batches
            .iter()
            .flat_map(|batch| batch.records.iter().map(|record| record.sample_index))
            .collect()
    }

    #[tokio::test]
    async fn sample_indices_are_contiguous_across_flushes() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(1234).await;
        h.logger.stop().await.unwrap();

        let batches = h.store.all_batches();
        assert_eq!(
            batches.iter().map(Batch::row_count).collect::<Vec<_>>(),
            vec![500, 500, 234]
        );
        for batch in &batches {
            assert_eq!(batch.records[0].sample_index, batch.start_sample_index);
        }
        assert_eq!(indices(&batches), (1..=1234).collect::<Vec<u64>>());

        let session_id = batches[0].session_id.clone();
        let session = h.store.get_session(&session_id).await.unwrap().unwrap();
        assert!(!session.active);
        assert_eq!(session.current_sample_index, 1234);
        let chunk = h.store.get_chunk(&session_id, 1).await.unwrap().unwrap();
        assert_eq!(chunk.row_count, 1234);
    }

    #[tokio::test]
    async fn threshold_flush_writes_one_batch() {
        let h = harness(LoggerConfig::default());
        h.logger.start(100, DeviceInfo::default()).await.unwrap();

        let outcomes = h.ticks(500).await;
        assert_eq!(
            outcomes.last(),
            Some(&TickOutcome::Sampled {
                sample_index: 500,
                flushed: true
            })
        );
        assert_eq!(h.store.batch_count(), 1);
        assert_eq!(h.store.all_batches()[0].row_count(), 500);
    }

    #[tokio::test]
    async fn flush_is_a_no_op_when_empty() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(7).await;

        assert_eq!(h.logger.flush_now().await.unwrap().committed, 7);
        assert_eq!(h.logger.flush_now().await.unwrap().committed, 0);
        assert_eq!(h.store.batch_count(), 1);
    }

    #[tokio::test]
    async fn first_record_of_a_chunk_has_zero_delta() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(3).await;
        h.logger.flush_now().await.unwrap();

        let records = &h.store.all_batches()[0].records;
        assert_eq!(records[0].dt_ms, 0);
        assert_eq!(records[1].dt_ms, 20);
        assert_eq!(records[2].dt_ms, 20);
        assert_eq!(records[0].ax, Some(0.1));
        assert!(records[0].motion_ok);
    }

    #[tokio::test]
    async fn rollover_happens_once_past_the_boundary() {
        let config = LoggerConfig {
            chunk_duration_ms: 60_000,
            ..LoggerConfig::default()
        };
        let h = harness(config);
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(10).await;

        h.clock.set(t0() + Duration::milliseconds(59_999));
        assert!(!h.logger.rollover_if_due().await.unwrap());
        h.clock.set(t0() + Duration::milliseconds(60_001));
        assert!(h.logger.rollover_if_due().await.unwrap());
        assert!(!h.logger.rollover_if_due().await.unwrap());

        let state = h.logger.public_state().await;
        assert_eq!(state.chunk_index, Some(2));
        assert_eq!(state.rows_in_chunk, Some(0));

        let session_id = state.session_id.unwrap();
        let chunks = h.store.list_chunks(&session_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].finalized);
        assert_eq!(chunks[0].row_count, 10);
        assert_eq!(chunks[0].end_time, Some(t0() + Duration::milliseconds(60_001)));
        assert!(!chunks[1].finalized);

        h.ticks(2).await;
        h.logger.flush_now().await.unwrap();
        let second = h.store.list_batches(&session_id, 2, None, 10).await.unwrap();
        assert_eq!(indices(&second), vec![1, 2]);
        assert_eq!(second[0].records[0].chunk, 2);
        assert_eq!(second[0].records[0].dt_ms, 0);

        let total: u64 = h
            .store
            .list_chunks(&session_id)
            .await
            .unwrap()
            .iter()
            .map(|chunk| chunk.row_count)
            .sum();
        assert_eq!(total, 12);
    }

    #[tokio::test]
    async fn sleep_across_several_durations_rolls_once() {
        let config = LoggerConfig {
            chunk_duration_ms: 60_000,
            ..LoggerConfig::default()
        };
        let h = harness(config);
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(1).await;

        h.clock.advance(Duration::minutes(5));
        h.ticks(1).await;

        assert_eq!(h.logger.public_state().await.chunk_index, Some(2));
    }

    fn batch_layout(batches: &[Batch]) -> Vec<(u32, u64, u64)> {
        batches
            .iter()
            .map(|batch| (batch.chunk_index, batch.start_sample_index, batch.row_count()))
            .collect()
    }

    #[tokio::test]
    async fn failed_chunk_roll_is_retried_on_the_next_tick() {
        let config = LoggerConfig {
            chunk_duration_ms: 60_000,
            ..LoggerConfig::default()
        };
        let h = harness(config);
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(10).await;
        h.logger.flush_now().await.unwrap();

        h.store.fail_next_chunk_writes(1);
        h.clock.set(t0() + Duration::milliseconds(60_001));
        assert_eq!(
            h.logger.sample_tick().await,
            TickOutcome::Sampled { sample_index: 11, flushed: false }
        );
        assert_eq!(h.logger.public_state().await.chunk_index, Some(1));

        assert_eq!(
            h.ticks(1).await,
            vec![TickOutcome::Sampled { sample_index: 1, flushed: false }]
        );
        assert_eq!(h.logger.public_state().await.chunk_index, Some(2));
        h.logger.flush_now().await.unwrap();

        let session_id = h.logger.public_state().await.session_id.unwrap();
        let first = h.store.get_chunk(&session_id, 1).await.unwrap().unwrap();
        assert!(first.finalized);
        assert_eq!(first.row_count, 11);
        assert_eq!(
            batch_layout(&h.store.all_batches()),
            vec![(1, 1, 10), (1, 11, 1), (2, 1, 1)]
        );
    }

    #[tokio::test]
    async fn failed_flush_before_roll_keeps_records_in_the_closing_chunk() {
        let config = LoggerConfig {
            chunk_duration_ms: 60_000,
            ..LoggerConfig::default()
        };
        let h = harness(config);
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(10).await;

        h.store.fail_next_batch_commits(1);
        h.clock.set(t0() + Duration::milliseconds(60_001));
        assert_eq!(
            h.logger.sample_tick().await,
            TickOutcome::Sampled { sample_index: 11, flushed: false }
        );
        assert_eq!(h.store.batch_count(), 0);

        h.ticks(1).await;
        h.logger.flush_now().await.unwrap();

        let session_id = h.logger.public_state().await.session_id.unwrap();
        let chunks = h.store.list_chunks(&session_id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].finalized);
        assert_eq!(chunks[0].row_count, 11);
        assert_eq!(chunks[1].row_count, 1);
        assert_eq!(
            batch_layout(&h.store.all_batches()),
            vec![(1, 1, 11), (2, 1, 1)]
        );
    }

    #[tokio::test]
    async fn lifecycle_changes_are_published() {
        let config = LoggerConfig {
            chunk_duration_ms: 60_000,
            ..LoggerConfig::default()
        };
        let h = harness(config);
        let mut rx = h.logger.subscribe();
        assert!(!rx.borrow_and_update().running);

        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        assert!(rx.has_changed().unwrap());
        let started = rx.borrow_and_update().clone();
        assert!(started.running);
        assert_eq!(started.chunk_index, Some(1));

        h.ticks(3).await;
        assert!(!rx.has_changed().unwrap());

        h.logger.flush_now().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().rows_in_chunk, Some(3));

        h.clock.set(t0() + Duration::milliseconds(60_001));
        assert!(h.logger.rollover_if_due().await.unwrap());
        assert!(rx.has_changed().unwrap());
        let rolled = rx.borrow_and_update().clone();
        assert_eq!(rolled.chunk_index, Some(2));
        assert_eq!(rolled.rows_in_chunk, Some(0));

        h.ticks(2).await;
        h.logger.stop().await.unwrap();
        assert!(rx.has_changed().unwrap());
        let stopped = rx.borrow_and_update().clone();
        assert!(!stopped.running);
        assert_eq!(stopped.rows_in_chunk, Some(2));
        assert_eq!(stopped.buffered_samples, 0);
        assert_eq!(stopped, h.logger.public_state().await);
    }

    #[tokio::test]
    async fn restore_publishes_the_resumed_session() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(t0());
        let first = harness_on(store.clone(), clock.clone(), LoggerConfig::default());
        first.logger.start(50, DeviceInfo::default()).await.unwrap();
        first.ticks(5).await;
        first.logger.flush_now().await.unwrap();
        drop(first);

        let second = harness_on(store, clock, LoggerConfig::default());
        let mut rx = second.logger.subscribe();
        second.logger.restore_if_needed().await.unwrap().unwrap();
        assert!(rx.has_changed().unwrap());
        let restored = rx.borrow_and_update().clone();
        assert!(!restored.running);
        assert_eq!(restored.rows_in_chunk, Some(5));
    }

    #[tokio::test]
    async fn failed_commit_keeps_buffer_for_retry() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(5).await;

        h.store.fail_next_batch_commits(1);
        assert!(h.logger.flush_now().await.is_err());
        assert_eq!(h.logger.public_state().await.buffered_samples, 5);
        assert_eq!(h.store.batch_count(), 0);

        h.ticks(1).await;
        assert_eq!(h.logger.flush_now().await.unwrap().committed, 6);
        assert_eq!(indices(&h.store.all_batches()), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn counters_catch_up_after_a_failed_progress_write() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(4).await;

        h.store.fail_next_session_writes(1);
        assert!(h.logger.flush_now().await.is_err());
        assert_eq!(h.store.batch_count(), 1);
        assert_eq!(h.logger.public_state().await.buffered_samples, 0);

        assert_eq!(h.logger.flush_now().await.unwrap().committed, 0);
        let session_id = h.logger.public_state().await.session_id.unwrap();
        let session = h.store.get_session(&session_id).await.unwrap().unwrap();
        assert_eq!(session.current_sample_index, 4);
        assert_eq!(h.store.batch_count(), 1);
    }

    #[tokio::test]
    async fn full_buffer_applies_backpressure_without_gaps() {
        let config = LoggerConfig {
            flush_every_samples: 3,
            max_buffered_samples: 3,
            ..LoggerConfig::default()
        };
        let h = harness(config);
        h.logger.start(50, DeviceInfo::default()).await.unwrap();

        h.store.fail_next_batch_commits(2);
        let outcomes = h.ticks(5).await;
        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Sampled { sample_index: 1, flushed: false },
                TickOutcome::Sampled { sample_index: 2, flushed: false },
                TickOutcome::Sampled { sample_index: 3, flushed: false },
                TickOutcome::Backpressure,
                TickOutcome::Sampled { sample_index: 4, flushed: false },
            ]
        );

        h.logger.flush_now().await.unwrap();
        assert_eq!(indices(&h.store.all_batches()), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn restart_continues_the_committed_sequence() {
        let config = LoggerConfig {
            chunk_duration_ms: 60_000,
            ..LoggerConfig::default()
        };
        let store = MemoryStore::new();
        let clock = ManualClock::new(t0());

        let first = harness_on(store.clone(), clock.clone(), config.clone());
        first.logger.start(50, DeviceInfo::default()).await.unwrap();
        first.ticks(10).await;
        clock.advance(Duration::seconds(61));
        first.ticks(120).await;
        first.logger.flush_now().await.unwrap();
        let session_id = first.logger.public_state().await.session_id.unwrap();
        // Crash: buffered-but-unflushed samples are lost with the process.
        first.ticks(3).await;
        drop(first);

        let second = harness_on(store.clone(), clock.clone(), config);
        let info = second.logger.restore_if_needed().await.unwrap().unwrap();
        assert_eq!(info.session_id, session_id);
        assert_eq!(info.chunk_index, 2);
        assert_eq!(info.row_count, 120);
        assert_eq!(info.next_sample_index, 121);

        second.logger.start(50, DeviceInfo::default()).await.unwrap();
        second.ticks(2).await;
        second.logger.flush_now().await.unwrap();

        let batches = store.list_batches(&session_id, 2, None, 10).await.unwrap();
        let resumed = batches.last().unwrap();
        assert_eq!(resumed.start_sample_index, 121);
        assert_eq!(indices(&batches), (1..=122).collect::<Vec<u64>>());
        assert_eq!(resumed.records[0].dt_ms, 3 * 20 + 20);
    }

    #[tokio::test]
    async fn failed_stop_can_be_retried() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(3).await;

        h.store.fail_next_batch_commits(1);
        assert!(h.logger.stop().await.is_err());
        let state = h.logger.public_state().await;
        assert!(!state.running);
        assert_eq!(state.buffered_samples, 3);
        assert!(h.logger.start(50, DeviceInfo::default()).await.is_err());

        h.logger.stop().await.unwrap();
        h.logger.stop().await.unwrap();
        assert_eq!(h.store.batch_count(), 1);
        let session_id = state.session_id.unwrap();
        assert!(!h.store.get_session(&session_id).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn start_again_resumes_the_same_session() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        let first_id = h.logger.public_state().await.session_id;
        h.logger.start(100, DeviceInfo::default()).await.unwrap();
        assert_eq!(h.logger.public_state().await.target_rate_hz, Some(50));

        h.ticks(2).await;
        h.logger.stop().await.unwrap();
        assert_eq!(h.logger.sample_tick().await, TickOutcome::Idle);

        h.logger.start(100, DeviceInfo::default()).await.unwrap();
        let state = h.logger.public_state().await;
        assert_eq!(state.session_id, first_id);
        assert_eq!(state.target_rate_hz, Some(100));
        assert!(state.running);

        h.ticks(1).await;
        h.logger.flush_now().await.unwrap();
        assert_eq!(indices(&h.store.all_batches()), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn new_session_deactivates_stale_ones() {
        let store = MemoryStore::new();
        for offset in 0..2 {
            let stale = Session::new(
                format!("s_stale{offset}"),
                t0() - Duration::hours(offset + 1),
                50,
                DeviceInfo::default(),
            );
            store
                .create_session(&stale, &Chunk::open(&stale.session_id, 1, stale.start_time))
                .await
                .unwrap();
            store
                .put_chunk(&Chunk::open(&stale.session_id, 1, stale.start_time).finalized_at(t0(), 0))
                .await
                .unwrap();
        }

        let h = harness_on(store, ManualClock::new(t0()), LoggerConfig::default());
        assert!(h.logger.restore_if_needed().await.unwrap().is_none());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();

        let active: Vec<_> = h
            .store
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .filter(|session| session.active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(
            Some(active[0].session_id.clone()),
            h.logger.public_state().await.session_id
        );
    }

    #[tokio::test]
    async fn rejects_rates_off_the_menu() {
        let h = harness(LoggerConfig::default());
        assert!(h.logger.start(42, DeviceInfo::default()).await.is_err());
        assert!(h.store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn public_state_without_session() {
        let h = harness(LoggerConfig::default());
        let state = h.logger.public_state().await;
        assert!(!state.running);
        assert_eq!(state.session_id, None);
        assert_eq!(state.rows_in_chunk, None);
        assert_eq!(state.achieved_rate_hz, None);
        assert_eq!(state.buffered_samples, 0);
    }

    #[tokio::test]
    async fn achieved_rate_tracks_tick_cadence() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(50).await;
        assert_eq!(h.logger.public_state().await.achieved_rate_hz, Some(50.0));
    }

    #[tokio::test]
    async fn clear_all_data_wipes_store_and_state() {
        let h = harness(LoggerConfig::default());
        h.logger.start(50, DeviceInfo::default()).await.unwrap();
        h.ticks(4).await;

        h.logger.clear_all_data().await.unwrap();

        assert_eq!(h.store.batch_count(), 0);
        assert!(h.store.list_sessions().await.unwrap().is_empty());
        let state = h.logger.public_state().await;
        assert!(!state.running);
        assert_eq!(state.session_id, None);
    }
}
