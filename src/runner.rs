//! Receive loop, one per active subscription.
//!
//! ```text
//! Starting ──► Running ──► Draining ──► Stopped
//!   lease        fetch        close
//!   renewer,     batch,       receiver,
//!   receiver     fan out,     then
//!                join all     renewer
//! ```
//!
//! Batches are strictly sequential: every message of a batch is settled
//! before the next fetch. Cancellation is polled between batches, so a
//! fetch or handler already in flight is never interrupted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{
    ConsumerConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_LEASE_RENEWAL_DURATION,
    DEFAULT_MAX_WAIT_TIME,
};
use crate::dispatch::Dispatched;
use crate::disposition::Disposition;
use crate::error::TransportError;
use crate::subscription::Subscription;
use crate::transport::{Connection, LeaseRenewer, Receiver, ReceiverTarget};

/// Lifecycle of a receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Effective batch settings for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_batch_size: usize,
    pub max_wait_time: Duration,
    pub max_lease_renewal_duration: Duration,
}

impl LoopSettings {
    /// Subscription overrides, falling back to the app defaults, then to
    /// the built-in defaults. Zero counts as unset at every level.
    pub fn resolve(subscription: &Subscription, config: &ConsumerConfig) -> Self {
        Self {
            max_batch_size: subscription
                .max_batch_size()
                .filter(|n| *n > 0)
                .or(Some(config.max_batch_size).filter(|n| *n > 0))
                .unwrap_or(DEFAULT_MAX_BATCH_SIZE),
            max_wait_time: nonzero(subscription.max_wait_time())
                .or(nonzero(Some(config.max_wait_time)))
                .unwrap_or(DEFAULT_MAX_WAIT_TIME),
            max_lease_renewal_duration: nonzero(subscription.max_lease_renewal_duration())
                .or(nonzero(Some(config.max_lease_renewal_duration)))
                .unwrap_or(DEFAULT_MAX_LEASE_RENEWAL_DURATION),
        }
    }
}

fn nonzero(duration: Option<Duration>) -> Option<Duration> {
    duration.filter(|d| !d.is_zero())
}

/// Counters from one receive loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunnerStats {
    /// Non-empty batches processed.
    pub batches: usize,
    /// Fetches that returned nothing.
    pub empty_polls: usize,
    pub messages: usize,
    pub acked: usize,
    pub retried: usize,
    pub rejected: usize,
    /// Dispositions the receiver failed to apply.
    pub settle_failures: usize,
}

impl RunnerStats {
    fn record(&mut self, dispatched: Dispatched) {
        match dispatched.disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Retry => self.retried += 1,
            Disposition::Reject => self.rejected += 1,
        }
        if !dispatched.settled {
            self.settle_failures += 1;
        }
    }
}

/// Drives one subscription until cancelled or until the transport fails.
pub struct ReceiveLoop {
    subscription: Arc<Subscription>,
    settings: LoopSettings,
    cancel: CancelToken,
    state: watch::Sender<RunnerState>,
}

impl ReceiveLoop {
    pub fn new(subscription: Arc<Subscription>, settings: LoopSettings, cancel: CancelToken) -> Self {
        Self {
            subscription,
            settings,
            cancel,
            state: watch::Sender::new(RunnerState::Starting),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Follow state changes; the receiver outlives `run`.
    pub fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    /// Run to completion. Transport failures are returned after the loop's
    /// resources have been released.
    pub async fn run(self, connection: Arc<dyn Connection>) -> Result<RunnerStats, TransportError> {
        let target = ReceiverTarget::new(
            self.subscription.stream_id(),
            self.subscription.group_id(),
        );

        let renewer = match connection
            .lease_renewer(self.settings.max_lease_renewal_duration)
            .await
        {
            Ok(renewer) => renewer,
            Err(err) => {
                self.transition(RunnerState::Stopped);
                return Err(err);
            }
        };
        let receiver = match connection
            .open_receiver(&target, Arc::clone(&renewer))
            .await
        {
            Ok(receiver) => receiver,
            Err(err) => {
                release_renewer(renewer.as_ref(), &target).await;
                self.transition(RunnerState::Stopped);
                return Err(err);
            }
        };

        info!(
            handler = %self.subscription.declared_name(),
            stream = %target.stream,
            group = %target.group,
            max_batch_size = self.settings.max_batch_size,
            max_wait_ms = self.settings.max_wait_time.as_millis() as u64,
            "starting message receiver"
        );
        self.transition(RunnerState::Running);

        let mut stats = RunnerStats::default();
        let pumped = self.pump(&receiver, &mut stats).await;

        self.transition(RunnerState::Draining);
        if let Err(err) = receiver.close().await {
            warn!(%target, error = %err, "failed to close receiver");
        }
        release_renewer(renewer.as_ref(), &target).await;
        self.transition(RunnerState::Stopped);

        match pumped {
            Ok(()) => {
                info!(
                    handler = %self.subscription.declared_name(),
                    %target,
                    batches = stats.batches,
                    messages = stats.messages,
                    "finished processing messages"
                );
                Ok(stats)
            }
            Err(err) => {
                error!(%target, error = %err, "receive loop failed");
                Err(err)
            }
        }
    }

    async fn pump(
        &self,
        receiver: &Arc<dyn Receiver>,
        stats: &mut RunnerStats,
    ) -> Result<(), TransportError> {
        let stream = self.subscription.stream_id();

        while !self.cancel.is_cancelled() {
            debug!(stream, "receiving messages");
            let batch = receiver
                .receive_batch(self.settings.max_batch_size, self.settings.max_wait_time)
                .await?;

            if batch.is_empty() {
                debug!(stream, "no messages received");
                stats.empty_polls += 1;
                // A broker may answer an empty fetch without ever awaiting.
                tokio::task::yield_now().await;
                continue;
            }

            let size = batch.len();
            info!(stream, batch_size = size, "batch received");
            let started = Instant::now();

            let mut in_flight = JoinSet::new();
            for message in batch {
                let subscription = Arc::clone(&self.subscription);
                let receiver = Arc::clone(receiver);
                in_flight.spawn(async move {
                    subscription
                        .handler()
                        .handle(receiver.as_ref(), &message)
                        .await
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok(dispatched) => stats.record(dispatched),
                    Err(err) => {
                        error!(stream, error = %err, "dispatch task failed");
                        stats.settle_failures += 1;
                    }
                }
            }

            stats.batches += 1;
            stats.messages += size;
            info!(
                stream,
                batch_size = size,
                duration_ms = started.elapsed().as_millis() as u64,
                "batch done"
            );
        }

        Ok(())
    }

    fn transition(&self, next: RunnerState) {
        let previous = self.state.send_replace(next);
        debug!(
            stream = %self.subscription.stream_id(),
            group = %self.subscription.group_id(),
            from = ?previous,
            to = ?next,
            "receive loop state change"
        );
    }
}

async fn release_renewer(renewer: &dyn LeaseRenewer, target: &ReceiverTarget) {
    if let Err(err) = renewer.close().await {
        warn!(%target, error = %err, "failed to close lease renewer");
    }
}
