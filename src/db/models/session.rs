//! Session data model: one logging run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device descriptor supplied by the caller at start. Copied onto every
/// Record so exported files stand on their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: Option<String>,
    pub platform: Option<String>,
    pub screen_w: Option<u32>,
    pub screen_h: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub target_rate_hz: u32,
    pub device: DeviceInfo,
    pub active: bool,
    pub current_chunk_index: u32,
    /// Samples committed in the current chunk.
    pub current_sample_index: u64,
    pub last_sample_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        session_id: String,
        start_time: DateTime<Utc>,
        target_rate_hz: u32,
        device: DeviceInfo,
    ) -> Self {
        Self {
            session_id,
            start_time,
            target_rate_hz,
            device,
            active: true,
            current_chunk_index: 1,
            current_sample_index: 0,
            last_sample_time: None,
        }
    }

    /// Latest observed activity: the last committed sample, else the start.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_sample_time.unwrap_or(self.start_time)
    }

    pub fn next_sample_index(&self) -> u64 {
        self.current_sample_index + 1
    }
}
