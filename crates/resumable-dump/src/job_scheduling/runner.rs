//! Tick runner service executing due resumptions

use super::tick_queue::TickQueue;
use super::types::ScheduledResumption;
use crate::config::SchedulingConfig;
use crate::engine::{ResumeOutcome, ResumptionEngine};
use crate::errors::AppResult;
use crate::utils::Clock;
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Service draining the tick queue into the resumption engine
///
/// Due entries run one after another; a job is never resumed concurrently
/// by the same runner.
pub struct TickRunner {
    queue: Arc<TickQueue>,
    engine: Arc<ResumptionEngine>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_ticks_per_poll: usize,
}

impl TickRunner {
    pub fn new(
        queue: Arc<TickQueue>,
        engine: Arc<ResumptionEngine>,
        clock: Arc<dyn Clock>,
        config: &SchedulingConfig,
    ) -> Self {
        Self {
            queue,
            engine,
            clock,
            poll_interval: config.poll_interval.max(Duration::from_millis(100)),
            max_ticks_per_poll: config.max_ticks_per_poll.max(1),
        }
    }

    /// Run every resumption due now; returns how many ran
    pub async fn run_once(&self) -> AppResult<usize> {
        self.queue.refresh().await?;
        let due = self
            .queue
            .take_due(self.clock.now(), self.max_ticks_per_poll)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!("Found {} resumptions ready for execution", due.len());
        let count = due.len();
        for tick in due {
            self.execute(tick).await;
        }
        Ok(count)
    }

    /// Poll the queue until cancelled
    pub async fn run(&self, cancellation_token: CancellationToken) -> AppResult<()> {
        info!("Starting tick runner (poll interval: {:?})", self.poll_interval);
        let mut poll = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Error processing due resumptions: {}", e);
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Tick runner received cancellation signal");
                    break;
                }
            }
        }

        info!("Tick runner stopped");
        Ok(())
    }

    async fn execute(&self, tick: ScheduledResumption) {
        let outcome = self.engine.resume(&tick.job_id, tick.resumption).await;
        match outcome {
            ResumeOutcome::Failed { error } => {
                warn!(
                    job_id = %tick.job_id,
                    resumption = tick.resumption,
                    "Resumption failed: {}",
                    error
                );
            }
            other => {
                debug!(
                    job_id = %tick.job_id,
                    resumption = tick.resumption,
                    "Resumption finished: {:?}",
                    other
                );
            }
        }
    }
}
