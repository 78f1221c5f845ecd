use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LoggerConfig;
use crate::db::DeviceInfo;
use crate::logger::{FlushOutcome, PublicState, ResumeInfo, SensorLogger};
use crate::store::SampleStore;

use super::loop_worker::{flush_loop, sampler_loop};

struct SamplerTasks {
    cancel_token: CancellationToken,
    sampler: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

impl SamplerTasks {
    async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        self.sampler
            .await
            .context("sampler loop task failed to join")?;
        self.flusher
            .await
            .context("flush loop task failed to join")?;
        Ok(())
    }
}

/// Owns a [`SensorLogger`] plus the sampler and flush tasks that drive it.
pub struct SamplerDriver<S: SampleStore> {
    logger: SensorLogger<S>,
    tasks: Mutex<Option<SamplerTasks>>,
}

impl<S: SampleStore> SamplerDriver<S> {
    pub fn new(logger: SensorLogger<S>) -> Self {
        Self {
            logger,
            tasks: Mutex::new(None),
        }
    }

    pub fn logger(&self) -> &SensorLogger<S> {
        &self.logger
    }

    pub async fn restore_if_needed(&self) -> Result<Option<ResumeInfo>> {
        self.logger.restore_if_needed().await
    }

    pub async fn start(&self, target_rate_hz: u32, device: DeviceInfo) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(previous) = tasks.take() {
            if self.logger.is_running().await {
                *tasks = Some(previous);
                bail!("sampler already running");
            }
            // The logger was stopped without going through the driver.
            previous.shutdown().await?;
        }

        self.logger.start(target_rate_hz, device).await?;

        let period = LoggerConfig::sample_interval(target_rate_hz);
        let flush_period = self.logger.config().flush_interval();
        let cancel_token = CancellationToken::new();

        let sampler = tokio::spawn(sampler_loop(
            self.logger.clone(),
            period,
            cancel_token.clone(),
        ));
        let flusher = tokio::spawn(flush_loop(
            self.logger.clone(),
            flush_period,
            cancel_token.clone(),
        ));

        info!(
            "sampler started at {target_rate_hz} Hz (period {}ms, flush every {}ms)",
            period.as_millis(),
            flush_period.as_millis()
        );
        *tasks = Some(SamplerTasks {
            cancel_token,
            sampler,
            flusher,
        });
        Ok(())
    }

    /// Cancels both tasks, waits for them, then stops the logger, which
    /// performs the final flush.
    pub async fn stop(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(running) = tasks.take() {
            running.shutdown().await?;
        }
        self.logger.stop().await
    }

    /// Stops the tasks, then wipes all stored data.
    pub async fn clear_all_data(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(running) = tasks.take() {
            running.shutdown().await?;
        }
        self.logger.clear_all_data().await
    }

    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        self.logger.flush_now().await
    }

    pub async fn public_state(&self) -> PublicState {
        self.logger.public_state().await
    }
}
