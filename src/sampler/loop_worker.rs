use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::logger::{SensorLogger, TickOutcome};
use crate::store::SampleStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Drives `sample_tick` at the sampler period. Late ticks are skipped, not
/// bunched, so a stalled runtime never produces a burst of samples.
pub async fn sampler_loop<S: SampleStore>(
    logger: SensorLogger<S>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sampler loop shutting down after {ticks} ticks");
                break;
            }
            _ = ticker.tick() => {
                ticks += 1;
                if logger.sample_tick().await == TickOutcome::Idle {
                    log_debug!("logger no longer running, sampler loop exiting");
                    break;
                }
            }
        }
    }
}

/// Flushes on a fixed period, first firing one period after start.
pub async fn flush_loop<S: SampleStore>(
    logger: SensorLogger<S>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("flush loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                match logger.flush_now().await {
                    Ok(outcome) if outcome.committed > 0 => {
                        log_debug!("timer flush committed {} records", outcome.committed);
                    }
                    Ok(_) => {}
                    Err(err) => log_warn!("timer flush failed, retrying next period: {err:?}"),
                }
            }
        }
    }
}
