use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::{Chunk, Session};

use super::buffer::BatchBuffer;

/// Rolling sample-rate estimate. The window restarts once it grows past
/// its configured length, so the estimate tracks recent cadence.
#[derive(Debug, Clone)]
pub struct AchievedRate {
    window: Duration,
    window_start: Option<DateTime<Utc>>,
    samples: u64,
}

impl AchievedRate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            samples: 0,
        }
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.window_start = Some(now);
        self.samples = 0;
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        let start = *self.window_start.get_or_insert(now);
        self.samples += 1;
        if now.signed_duration_since(start) > self.window {
            self.window_start = Some(now);
            self.samples = 1;
        }
    }

    /// Samples per second, rounded to 0.1 Hz.
    pub fn estimate(&self, now: DateTime<Utc>) -> Option<f64> {
        let start = self.window_start?;
        if self.samples == 0 {
            return None;
        }
        let elapsed_ms = now.signed_duration_since(start).num_milliseconds();
        if elapsed_ms <= 0 {
            return None;
        }
        let hz = self.samples as f64 * 1000.0 / elapsed_ms as f64;
        Some((hz * 10.0).round() / 10.0)
    }
}

pub(crate) struct LoggerState {
    pub running: bool,
    pub session: Option<Session>,
    /// The open chunk of `session`, as last persisted.
    pub chunk: Option<Chunk>,
    /// Time of the latest sample taken in the current chunk, flushed or not.
    pub last_sample_time: Option<DateTime<Utc>>,
    pub buffer: BatchBuffer,
    pub rate: AchievedRate,
    pub backpressured: bool,
    /// A batch committed but the counter update after it did not.
    pub progress_dirty: bool,
    /// `stop` began but its final flush or deactivation failed.
    pub stop_pending: bool,
}

impl LoggerState {
    pub fn new(max_buffered_samples: usize, rate_window: Duration) -> Self {
        Self {
            running: false,
            session: None,
            chunk: None,
            last_sample_time: None,
            buffer: BatchBuffer::new(max_buffered_samples),
            rate: AchievedRate::new(rate_window),
            backpressured: false,
            progress_dirty: false,
            stop_pending: false,
        }
    }

    /// Adopts `session` and `chunk` as the current cursor; the buffer starts
    /// right after the last committed sample.
    pub fn adopt(&mut self, session: Session, chunk: Chunk) {
        self.buffer.reset_for(
            &session.session_id,
            session.current_chunk_index,
            session.next_sample_index(),
        );
        self.last_sample_time = session.last_sample_time;
        self.session = Some(session);
        self.chunk = Some(chunk);
        self.backpressured = false;
    }

    pub fn clear(&mut self) {
        self.running = false;
        self.session = None;
        self.chunk = None;
        self.last_sample_time = None;
        self.buffer.reset_for("", 0, 1);
        self.backpressured = false;
        self.progress_dirty = false;
        self.stop_pending = false;
    }

    pub fn public_view(&self, now: DateTime<Utc>, wake_lock: bool) -> PublicState {
        let session = self.session.as_ref();
        PublicState {
            running: self.running,
            session_id: session.map(|s| s.session_id.clone()),
            target_rate_hz: session.map(|s| s.target_rate_hz),
            chunk_index: session.map(|s| s.current_chunk_index),
            rows_in_chunk: session.map(|s| s.current_sample_index),
            buffered_samples: self.buffer.len(),
            achieved_rate_hz: if self.running {
                self.rate.estimate(now)
            } else {
                None
            },
            wake_lock,
        }
    }
}

/// Read-only view for UIs; valid with or without a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicState {
    pub running: bool,
    pub session_id: Option<String>,
    pub target_rate_hz: Option<u32>,
    pub chunk_index: Option<u32>,
    /// Committed rows in the current chunk.
    pub rows_in_chunk: Option<u64>,
    pub buffered_samples: usize,
    pub achieved_rate_hz: Option<f64>,
    pub wake_lock: bool,
}
