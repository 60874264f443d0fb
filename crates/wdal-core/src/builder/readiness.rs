//! Bounded `/status` polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::LaunchError;
use crate::proxy::StatusSource;
use crate::status::StatusSnapshot;

/// Per-attempt request timeout. The source's own timeout applies again
/// to every later request.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default pause between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    /// The agent answered.
    Ready(StatusSnapshot),
    /// The tracked process exited before the agent answered.
    Exited,
}

/// Poll `source` until it answers, the process exits, or the budget runs out.
///
/// Makes `timeout_ms / interval` attempts (at least one). `exited` is checked
/// before every attempt; once set no further request is made.
pub async fn poll_readiness(
    source: &dyn StatusSource,
    timeout_ms: u64,
    interval: Duration,
    exited: &AtomicBool,
) -> Result<Readiness, LaunchError> {
    let interval_ms = interval.as_millis().max(1) as u64;
    let attempts = (timeout_ms / interval_ms).max(1);
    let started = Instant::now();
    debug!("Waiting up to {timeout_ms}ms for WebDriverAgent to start");

    for attempt in 1..=attempts {
        if exited.load(Ordering::SeqCst) {
            debug!(attempt, "process exited; stopping the readiness probe");
            return Ok(Readiness::Exited);
        }

        match source.status(Some(ATTEMPT_TIMEOUT)).await {
            Ok(status) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "WebDriverAgent successfully started"
                );
                return Ok(Readiness::Ready(status));
            }
            Err(e) => debug!(attempt, attempts, "Unable to connect to running WebDriverAgent: {e}"),
        }

        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    if exited.load(Ordering::SeqCst) {
        return Ok(Readiness::Exited);
    }
    Err(LaunchError::ReadinessTimeout { timeout_ms })
}
