//! Command-line host: `sensor-logger [DB_PATH] [SECONDS] [RATE_HZ]`.
//!
//! Feeds the logger a synthetic sensor source, since real motion and
//! location acquisition belongs to the embedding platform.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LoggerConfig;
use crate::db::{Database, DeviceInfo};
use crate::export::ChunkExporter;
use crate::logger::{PublicState, SensorLogger};
use crate::sampler::SamplerDriver;
use crate::sensors::{MotionReading, PositionFix, SharedSnapshot};
use crate::store::SampleStore;

const DEFAULT_DB_FILE: &str = "sensor-logger.sqlite3";
const CONFIG_FILE: &str = "sensor-logger.json";
const DEFAULT_SECONDS: u64 = 10;
const DEFAULT_RATE_HZ: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub db_path: PathBuf,
    pub seconds: u64,
    pub rate_hz: u32,
}

impl CliArgs {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut args = args.into_iter();
        let db_path = args
            .next()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        let seconds = match args.next() {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("SECONDS must be a whole number, got {raw:?}"))?,
            None => DEFAULT_SECONDS,
        };
        let rate_hz = match args.next() {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("RATE_HZ must be a whole number, got {raw:?}"))?,
            None => DEFAULT_RATE_HZ,
        };
        Ok(Self {
            db_path,
            seconds,
            rate_hz,
        })
    }
}

fn sibling_dir(db_path: &Path) -> PathBuf {
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Jittery phone-at-rest motion plus a slowly drifting GPS fix.
fn spawn_synthetic_sensors(snapshot: SharedSnapshot, cancel_token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rng = StdRng::from_entropy();
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        let mut tick: u64 = 0;
        let (mut lat, mut lon) = (52.5200_f64, 13.4050_f64);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    tick += 1;
                    let reading = MotionReading {
                        acceleration: None,
                        acceleration_with_gravity: Some([
                            rng.gen_range(-0.2..0.2),
                            rng.gen_range(-0.2..0.2),
                            9.81 + rng.gen_range(-0.05..0.05),
                        ]),
                        rotation_rate: Some([
                            rng.gen_range(-1.0..1.0),
                            rng.gen_range(-1.0..1.0),
                            rng.gen_range(-1.0..1.0),
                        ]),
                    };
                    snapshot.update(|s| s.apply_motion(&reading));

                    if tick % 100 == 0 {
                        lat += rng.gen_range(-0.00001..0.00001);
                        lon += rng.gen_range(-0.00001..0.00001);
                        let fix = PositionFix {
                            latitude: lat,
                            longitude: lon,
                            accuracy_m: Some(rng.gen_range(3.0..12.0)),
                            speed_mps: Some(0.0),
                            heading_deg: None,
                            altitude_m: Some(34.0),
                        };
                        snapshot.update(|s| {
                            s.apply_position(&fix);
                            s.apply_orientation(Some(0.0), Some(0.0), Some(0.0));
                        });
                    }
                }
            }
        }
    })
}

/// Stops the driver and returns the state after the final flush, plus the
/// achieved rate measured just before stopping.
async fn stop_driver<S: SampleStore>(
    driver: &SamplerDriver<S>,
) -> Result<(PublicState, Option<f64>)> {
    let achieved_rate_hz = driver.public_state().await.achieved_rate_hz;
    driver.stop().await?;
    Ok((driver.public_state().await, achieved_rate_hz))
}

pub async fn run_cli(args: CliArgs) -> Result<()> {
    let data_dir = sibling_dir(&args.db_path);
    let config = LoggerConfig::load(&data_dir.join(CONFIG_FILE))?.apply_env_overrides();

    let database = Database::new(args.db_path.clone())?;
    let snapshot = SharedSnapshot::new();
    snapshot.set_wake_lock(true);

    let logger = SensorLogger::with_system_clock(
        Arc::new(database.clone()),
        config,
        Arc::new(snapshot.clone()),
    )?;
    let driver = SamplerDriver::new(logger);

    if let Some(resume) = driver.restore_if_needed().await? {
        info!(
            "resuming session {} at chunk {} (next sample {})",
            resume.session_id, resume.chunk_index, resume.next_sample_index
        );
    }

    let sensors_cancel = CancellationToken::new();
    let sensors = spawn_synthetic_sensors(snapshot, sensors_cancel.clone());

    let device = DeviceInfo {
        device: Some("synthetic".to_string()),
        platform: Some(std::env::consts::OS.to_string()),
        screen_w: None,
        screen_h: None,
    };
    driver.start(args.rate_hz, device).await?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for ctrl-c: {err}");
            }
            info!("interrupted, stopping");
        }
    }

    let (state, achieved_rate_hz) = stop_driver(&driver).await?;
    sensors_cancel.cancel();
    if let Err(err) = sensors.await {
        warn!("synthetic sensor task ended abnormally: {err}");
    }

    info!(
        "logged {:?} rows in chunk {:?}, achieved {:?} Hz",
        state.rows_in_chunk, state.chunk_index, achieved_rate_hz
    );

    if let (Some(session_id), Some(chunk_index)) = (state.session_id, state.chunk_index) {
        let exporter = ChunkExporter::new(&database);
        let files = exporter
            .export_session(&session_id, &data_dir, Utc::now())
            .await?;
        if let Some(file) = files.iter().find(|file| file.chunk_index == chunk_index) {
            println!("{}", file.path.display());
        }
    }

    Ok(())
}
