//! The latest-known sensor values, as handed to the sampler.
//!
//! Acquisition itself lives with the host (motion events, orientation,
//! geolocation, wake lock). The host pushes readings into a
//! [`SharedSnapshot`]; the sampler reads a copy on every tick. Any field may
//! be `None` at any time.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    // acceleration, primary channels (m/s^2, gravity included when available)
    pub ax: Option<f64>,
    pub ay: Option<f64>,
    pub az: Option<f64>,
    // acceleration including gravity (m/s^2)
    pub ax_g: Option<f64>,
    pub ay_g: Option<f64>,
    pub az_g: Option<f64>,
    // rotation rate, logged raw
    pub gx: Option<f64>,
    pub gy: Option<f64>,
    pub gz: Option<f64>,
    // orientation (deg)
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub gamma: Option<f64>,
    // location
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub gps_acc_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub alt_m: Option<f64>,

    pub motion_ok: bool,
    pub gps_ok: bool,
    pub wake_lock: bool,
}

/// One motion event. Each vector is optional because platforms report
/// different subsets.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionReading {
    pub acceleration: Option<[f64; 3]>,
    pub acceleration_with_gravity: Option<[f64; 3]>,
    pub rotation_rate: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub heading_deg: Option<f64>,
    pub altitude_m: Option<f64>,
}

pub fn finite_or_null(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn finite_opt(value: Option<f64>) -> Option<f64> {
    value.and_then(finite_or_null)
}

fn split(vector: [f64; 3]) -> (Option<f64>, Option<f64>, Option<f64>) {
    (
        finite_or_null(vector[0]),
        finite_or_null(vector[1]),
        finite_or_null(vector[2]),
    )
}

impl SensorSnapshot {
    /// Primary axes prefer gravity-included acceleration so a resting device
    /// reads ~9.8 m/s^2 on one axis; plain acceleration is the fallback.
    pub fn apply_motion(&mut self, reading: &MotionReading) {
        if let Some(vector) = reading
            .acceleration_with_gravity
            .or(reading.acceleration)
        {
            let (x, y, z) = split(vector);
            self.ax = x;
            self.ay = y;
            self.az = z;
            self.ax_g = x;
            self.ay_g = y;
            self.az_g = z;
        }
        if let Some(rate) = reading.rotation_rate {
            let (x, y, z) = split(rate);
            self.gx = x;
            self.gy = y;
            self.gz = z;
        }
        self.motion_ok = true;
    }

    pub fn apply_orientation(&mut self, alpha: Option<f64>, beta: Option<f64>, gamma: Option<f64>) {
        self.alpha = finite_opt(alpha);
        self.beta = finite_opt(beta);
        self.gamma = finite_opt(gamma);
    }

    pub fn apply_position(&mut self, fix: &PositionFix) {
        self.lat = finite_or_null(fix.latitude);
        self.lon = finite_or_null(fix.longitude);
        self.gps_acc_m = finite_opt(fix.accuracy_m);
        self.speed_mps = finite_opt(fix.speed_mps);
        self.heading_deg = finite_opt(fix.heading_deg);
        self.alt_m = finite_opt(fix.altitude_m);
        self.gps_ok = true;
    }

    /// Position errors keep the last fix but clear the reporting flag.
    pub fn mark_position_lost(&mut self) {
        self.gps_ok = false;
    }
}

/// Source of the current snapshot, read synchronously once per sample tick.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> SensorSnapshot;
}

impl SnapshotProvider for SensorSnapshot {
    fn snapshot(&self) -> SensorSnapshot {
        self.clone()
    }
}

/// Host-updated snapshot shared with the sampler.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshot {
    inner: Arc<RwLock<SensorSnapshot>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut SensorSnapshot),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut *guard);
    }

    pub fn set_wake_lock(&self, held: bool) {
        self.update(|snapshot| snapshot.wake_lock = held);
    }
}

impl SnapshotProvider for SharedSnapshot {
    fn snapshot(&self) -> SensorSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
