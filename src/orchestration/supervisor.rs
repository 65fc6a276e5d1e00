//! Daemon mode: rerun the control loop after failures with exponential
//! backoff until a stop is requested.

use crate::engine::EngineError;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 5 s doubling to 120 s with jitter, never giving up.
pub fn restart_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(5),
        max_interval: Duration::from_secs(120),
        multiplier: 2.0,
        randomization_factor: 0.2,
        max_elapsed_time: None,
        ..Default::default()
    }
}

/// Run `run_once` repeatedly. Each run receives the stop channel and must
/// return once it flips to `true`. Fatal errors end supervision.
pub async fn supervise<F, Fut>(
    mut stop: watch::Receiver<bool>,
    mut backoff: ExponentialBackoff,
    mut run_once: F,
) -> Result<u32, EngineError>
where
    F: FnMut(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), EngineError>>,
{
    let mut runs = 0u32;
    loop {
        runs += 1;
        let result = run_once(stop.clone()).await;
        if *stop.borrow() {
            info!(runs, "Supervisor stopping");
            return Ok(runs);
        }
        match result {
            Ok(()) => backoff.reset(),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Fatal error, not restarting");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "Run failed"),
        }
        let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
        info!(delay_ms = delay.as_millis() as u64, "Restarting after delay");
        tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => {
                info!(runs, "Supervisor stopping");
                return Ok(runs);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
