//! Bounded poll-to-converge loop for writes whose effect shows up in reads
//! only after some propagation delay.

use crate::{
    config::ClusterConfig,
    error::{ClientError, Result},
};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Outcome of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence<T> {
    /// Not visible yet, keep polling
    Pending,
    /// Visible, stop with this value
    Done(T),
}

/// Timing of a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub delay: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            delay: config.poll_delay,
            interval: config.poll_interval,
            timeout: config.timeout,
        }
    }
}

/// Call `check` until it reports [`Convergence::Done`], an error, or the
/// schedule's timeout elapses (counted from the call, delay included).
pub async fn poll_until<T, F, Fut>(resource: &str, schedule: PollSchedule, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Convergence<T>>>,
{
    let started = Instant::now();
    let attempts = async {
        sleep(schedule.delay).await;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match check().await? {
                Convergence::Done(value) => {
                    debug!(resource, attempt, elapsed_ms = started.elapsed().as_millis() as u64, "Converged");
                    return Ok(value);
                }
                Convergence::Pending => {
                    debug!(resource, attempt, "Not visible yet");
                    sleep(schedule.interval).await;
                }
            }
        }
    };

    timeout(schedule.timeout, attempts)
        .await
        .map_err(|_| ClientError::ReconcileTimeout {
            resource: resource.to_string(),
            timeout_ms: schedule.timeout.as_millis() as u64,
        })?
}
