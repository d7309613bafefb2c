//! The periodic publish loop.
//!
//! Every cycle acquires a broker session, consumes the job file if it is
//! present, publishes its jobs in order, releases the session and waits for
//! the configured interval. Any failure abandons the cycle; the loop keeps
//! going until the shutdown signal fires during a wait.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::broker::{Broker, ChannelOf, ConnectionError, with_connection};
use crate::config::Config;
use crate::publisher::{self, Outcome, PublishError};
use crate::source::{self, SourceError};

/// Source of the pause between cycles.
pub trait Timer: Send + Sync {
    /// Resolve once `period` has elapsed.
    fn sleep(&self, period: Duration) -> impl Future<Output = ()> + Send;
}

/// [`Timer`] backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    async fn sleep(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}

/// Phases of the publish loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between cycles.
    Idle,
    /// Opening the connection, channel and work queue.
    Connecting,
    /// Session established; loading jobs.
    Connected,
    /// Publishing the loaded batch.
    Publishing,
    /// Releasing the session.
    Closing,
    /// Shut down; no further cycles run.
    Terminated,
}

/// Reasons a cycle was abandoned.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The broker session could not be established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// The job file could not be consumed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Publishing stopped part way through the batch.
    #[error("publishing stopped with {dropped} job(s) unpublished: {source}")]
    Publish {
        #[source]
        source: PublishError,
        dropped: usize,
    },
}

impl CycleError {
    /// Jobs consumed from the job file but never published.
    #[must_use]
    pub fn dropped(&self) -> usize {
        match self {
            Self::Publish { dropped, .. } => *dropped,
            Self::Connection(_) | Self::Source(_) => 0,
        }
    }
}

/// Per-cycle publish counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Jobs the broker routed.
    pub accepted: usize,
    /// Jobs the broker returned.
    pub rejected: usize,
}

/// Totals accumulated over the life of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Cycles started.
    pub cycles: u64,
    /// Cycles abandoned because of an error.
    pub failed_cycles: u64,
    /// Jobs accepted by the broker.
    pub accepted: u64,
    /// Jobs returned by the broker.
    pub rejected: u64,
    /// Jobs lost to abandoned cycles.
    pub dropped: u64,
}

impl LoopStats {
    fn record(&mut self, result: &Result<CycleReport, CycleError>) {
        self.cycles += 1;
        match result {
            Ok(report) => {
                self.accepted += report.accepted as u64;
                self.rejected += report.rejected as u64;
            }
            Err(e) => {
                self.failed_cycles += 1;
                self.dropped += e.dropped() as u64;
            }
        }
    }
}

/// Hooks used to observe the loop during tests.
#[derive(Debug, Default, Clone)]
pub struct LoopHooks {
    /// Receives every state the loop enters.
    pub transitions: Option<mpsc::UnboundedSender<LoopState>>,
}

impl LoopHooks {
    fn notify_state(&self, state: LoopState) {
        if let Some(tx) = &self.transitions {
            let _ = tx.send(state);
        }
    }
}

/// Drives publish cycles against a [`Broker`] until shut down.
pub struct PublishLoop<B, T> {
    config: Arc<Config>,
    broker: B,
    timer: T,
    hooks: LoopHooks,
}

impl<B: Broker, T: Timer> PublishLoop<B, T> {
    /// Create a loop publishing according to `config`.
    pub fn new(config: Arc<Config>, broker: B, timer: T) -> Self {
        Self {
            config,
            broker,
            timer,
            hooks: LoopHooks::default(),
        }
    }

    /// Attach observation hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: LoopHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Run cycles until `shutdown` fires.
    ///
    /// The signal is only observed while waiting between cycles, so a cycle
    /// in progress always runs to completion. Dropping the sender also stops
    /// the loop.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) -> LoopStats {
        let mut stats = LoopStats::default();
        self.enter(LoopState::Idle);
        tracing::info!(work_queue = %self.config.work_queue, "Beginning processing");

        loop {
            let result = self.run_cycle().await;
            stats.record(&result);
            match &result {
                Ok(report) => tracing::info!(
                    accepted = report.accepted,
                    rejected = report.rejected,
                    "Cycle complete"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    retry_in_secs = self.config.cycle_interval_secs,
                    "Cycle abandoned"
                ),
            }
            self.enter(LoopState::Idle);
            if self.wait_or_shutdown(&mut shutdown).await {
                break;
            }
        }

        self.enter(LoopState::Terminated);
        tracing::info!(
            cycles = stats.cycles,
            accepted = stats.accepted,
            rejected = stats.rejected,
            dropped = stats.dropped,
            "Terminated processing"
        );
        stats
    }

    async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        self.enter(LoopState::Connecting);
        with_connection(
            &self.broker,
            &self.config.work_queue,
            async |channel: &ChannelOf<B>| {
                let result = self.publish_batch(channel).await;
                self.enter(LoopState::Closing);
                result
            },
        )
        .await
    }

    async fn publish_batch(&self, channel: &ChannelOf<B>) -> Result<CycleReport, CycleError> {
        self.enter(LoopState::Connected);
        let batch = source::load(self.config.job_filename.as_deref()).await?;
        self.enter(LoopState::Publishing);

        let total = batch.len();
        let mut report = CycleReport::default();
        for (index, job) in batch.iter().enumerate() {
            match publisher::publish(channel, &self.config.work_queue, job).await {
                Ok(Outcome::Accepted) => report.accepted += 1,
                Ok(Outcome::Rejected) => report.rejected += 1,
                Err(source) => {
                    let dropped = total - index;
                    tracing::warn!(dropped, "Abandoning unpublished jobs");
                    return Err(CycleError::Publish { source, dropped });
                }
            }
        }
        Ok(report)
    }

    /// Sleep for the cycle interval or return early if `shutdown` is
    /// triggered.
    ///
    /// Returns `true` if a shutdown occurred.
    async fn wait_or_shutdown(&self, shutdown: &mut watch::Receiver<()>) -> bool {
        tokio::select! {
            () = self.timer.sleep(self.config.cycle_interval()) => false,
            _ = shutdown.changed() => true,
        }
    }

    fn enter(&self, state: LoopState) {
        tracing::debug!(?state, "Publish loop state");
        self.hooks.notify_state(state);
    }
}
