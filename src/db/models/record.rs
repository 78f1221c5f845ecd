//! Record data model: one sample with a fixed, fully populated schema.
//!
//! Every key is always present in the serialized form. Unavailable sensor
//! values are written as `null`, flags as `0`/`1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::helpers::format_datetime;
use crate::sensors::SensorSnapshot;

use super::Session;

/// Serialized key order of a [`Record`].
pub const RECORD_KEYS: [&str; 32] = [
    // time
    "utc", "epoch_ms", "dt_ms",
    // session
    "session_id", "chunk", "sample_index", "target_hz",
    // motion
    "ax", "ay", "az", "ax_g", "ay_g", "az_g",
    "gx", "gy", "gz",
    "alpha", "beta", "gamma",
    // location
    "lat", "lon", "gps_acc_m", "speed_mps", "heading_deg", "alt_m",
    // device
    "device", "platform", "screen_w", "screen_h",
    // flags
    "motion_ok", "gps_ok", "wake_lock",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub utc: String,
    pub epoch_ms: i64,
    pub dt_ms: i64,

    pub session_id: String,
    pub chunk: u32,
    pub sample_index: u64,
    pub target_hz: u32,

    pub ax: Option<f64>,
    pub ay: Option<f64>,
    pub az: Option<f64>,
    pub ax_g: Option<f64>,
    pub ay_g: Option<f64>,
    pub az_g: Option<f64>,
    pub gx: Option<f64>,
    pub gy: Option<f64>,
    pub gz: Option<f64>,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,

    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub gps_acc_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub alt_m: Option<f64>,

    pub device: Option<String>,
    pub platform: Option<String>,
    pub screen_w: Option<u32>,
    pub screen_h: Option<u32>,

    #[serde(with = "flag")]
    pub motion_ok: bool,
    #[serde(with = "flag")]
    pub gps_ok: bool,
    #[serde(with = "flag")]
    pub wake_lock: bool,
}

/// Cursor values a Record is stamped with.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext<'a> {
    pub session: &'a Session,
    pub sample_index: u64,
    pub at: DateTime<Utc>,
    pub dt_ms: i64,
}

impl Record {
    pub fn from_snapshot(ctx: SampleContext<'_>, snapshot: &SensorSnapshot) -> Self {
        let session = ctx.session;
        Self {
            utc: format_datetime(&ctx.at),
            epoch_ms: ctx.at.timestamp_millis(),
            dt_ms: ctx.dt_ms,

            session_id: session.session_id.clone(),
            chunk: session.current_chunk_index,
            sample_index: ctx.sample_index,
            target_hz: session.target_rate_hz,

            ax: snapshot.ax,
            ay: snapshot.ay,
            az: snapshot.az,
            ax_g: snapshot.ax_g,
            ay_g: snapshot.ay_g,
            az_g: snapshot.az_g,
            gx: snapshot.gx,
            gy: snapshot.gy,
            gz: snapshot.gz,
            alpha: snapshot.alpha,
            beta: snapshot.beta,
            gamma: snapshot.gamma,

            lat: snapshot.lat,
            lon: snapshot.lon,
            gps_acc_m: snapshot.gps_acc_m,
            speed_mps: snapshot.speed_mps,
            heading_deg: snapshot.heading_deg,
            alt_m: snapshot.alt_m,

            device: session.device.device.clone(),
            platform: session.device.platform.clone(),
            screen_w: session.device.screen_w,
            screen_h: session.device.screen_h,

            motion_ok: snapshot.motion_ok,
            gps_ok: snapshot.gps_ok,
            wake_lock: snapshot.wake_lock,
        }
    }

    pub fn sampled_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.epoch_ms)
    }
}

mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(u8::deserialize(deserializer)? != 0)
    }
}
