//! Runtime orchestrator.
//!
//! ## Example
//!
//! ```ignore
//! use topic_consumer::{consumer, ConsumerApp, ConsumerConfig, EventType, EventTypeRegistry};
//!
//! let event_types = EventTypeRegistry::discover([
//!     EventType::of::<TaskCreatedStateChangeEvent>(),
//!     EventType::of::<TaskUpdatedStateChangeEvent>(),
//! ])?;
//!
//! let mut app = ConsumerApp::new(ConsumerConfig::from_env()?, broker, event_types);
//! app.consume(consumer!(handlers::on_task_created))?;
//! app.consume(consumer!(handlers::on_task_updated))?;
//!
//! // Runs until SIGTERM, `app.cancel()`, or a transport failure.
//! let report = app.run(None).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{ConsumerConfig, SubscriptionFilter};
use crate::error::{RegistrationError, RunError};
use crate::event::EventTypeRegistry;
use crate::runner::{LoopSettings, ReceiveLoop, RunnerStats};
use crate::subscription::{Consumer, Subscription, SubscriptionOptions, SubscriptionRegistry};
use crate::transport::{Broker, Connection, Credentials};

/// Stats of one runner, in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerReport {
    /// `"<stream>|<group>"`.
    pub key: String,
    pub handler: String,
    pub stats: RunnerStats,
}

/// Outcome of a completed [`ConsumerApp::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub runners: Vec<RunnerReport>,
}

impl RunReport {
    /// Stats for a subscription key. With duplicate registrations, the
    /// first one wins.
    pub fn get(&self, key: &str) -> Option<&RunnerStats> {
        self.runners.iter().find(|r| r.key == key).map(|r| &r.stats)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.runners.iter().map(|r| r.key.as_str()).collect()
    }

    /// Sum of every runner's counters.
    pub fn total(&self) -> RunnerStats {
        self.runners
            .iter()
            .fold(RunnerStats::default(), |mut acc, r| {
                acc.batches += r.stats.batches;
                acc.empty_polls += r.stats.empty_polls;
                acc.messages += r.stats.messages;
                acc.acked += r.stats.acked;
                acc.retried += r.stats.retried;
                acc.rejected += r.stats.rejected;
                acc.settle_failures += r.stats.settle_failures;
                acc
            })
    }
}

/// Owns the subscriptions, the broker and the cancel token.
pub struct ConsumerApp<B> {
    config: ConsumerConfig,
    broker: B,
    registry: SubscriptionRegistry,
    cancel: CancelToken,
}

impl<B: Broker> ConsumerApp<B> {
    pub fn new(config: ConsumerConfig, broker: B, event_types: EventTypeRegistry) -> Self {
        let registry = SubscriptionRegistry::new(event_types, config.default_group.clone());
        Self {
            config,
            broker,
            registry,
            cancel: CancelToken::new(),
        }
    }

    /// Register a consumer with explicit options. The app's handler
    /// timeout applies when the options leave it unset.
    pub fn register(
        &mut self,
        consumer: Consumer,
        mut options: SubscriptionOptions,
    ) -> Result<Arc<Subscription>, RegistrationError> {
        if options.handler_timeout.is_none() {
            options.handler_timeout = self.config.handler_timeout;
        }
        self.registry.register(consumer, options)
    }

    /// Register a consumer by naming convention alone.
    pub fn consume(&mut self, consumer: Consumer) -> Result<Arc<Subscription>, RegistrationError> {
        self.register(consumer, SubscriptionOptions::new())
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Ask every runner to stop after its current batch. Idempotent and
    /// safe to call from any thread.
    pub fn cancel(&self) {
        if self.cancel.cancel() {
            info!("consumer app cancelled");
        }
    }

    /// Clone of the app's token, for external shutdown triggers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Connect, run one receive loop per eligible subscription, and wait for
    /// all of them. Returns once every loop has stopped and the connection
    /// is closed.
    ///
    /// On unix, SIGTERM received while running cancels the app. SIGINT is
    /// left to the host process; wire Ctrl-C to [`cancel_token`](Self::cancel_token)
    /// if it should stop the consumer too.
    pub async fn run(&self, filter: Option<SubscriptionFilter>) -> Result<RunReport, RunError> {
        if self.registry.is_empty() {
            return Err(RunError::NoSubscriptions);
        }

        let credentials = self.config.connection.credentials();
        info!(credentials = credentials_kind(&credentials), "connecting to broker");
        let connection = self.broker.connect(&credentials).await?;

        let signals = watch_signals(self.cancel.clone());
        let result = self.run_subscriptions(&connection, filter).await;
        signals.abort();

        if let Err(err) = connection.close().await {
            warn!(error = %err, "failed to close broker connection");
        }

        match &result {
            Ok(report) => info!(runners = report.runners.len(), "consumer app stopped"),
            Err(err) => error!(error = %err, "consumer app stopped with error"),
        }
        result
    }

    async fn run_subscriptions(
        &self,
        connection: &Arc<dyn Connection>,
        filter: Option<SubscriptionFilter>,
    ) -> Result<RunReport, RunError> {
        let filter = filter.or_else(|| self.config.filter.clone());
        if let Some(filter) = &filter {
            info!(entries = filter.len(), "applying subscription filter");
        }

        let selected: Vec<&Arc<Subscription>> = self
            .registry
            .iter()
            .filter(|sub| filter.as_ref().map_or(true, |f| f.allows(sub)))
            .collect();

        if selected.is_empty() {
            warn!("no subscriptions match the filter, nothing to run");
            return Ok(RunReport::default());
        }

        let mut runners = JoinSet::new();
        let mut slots = HashMap::new();
        let mut reports: Vec<Option<RunnerReport>> = Vec::with_capacity(selected.len());

        for (index, sub) in selected.iter().enumerate() {
            let settings = LoopSettings::resolve(sub, &self.config);
            let runner = ReceiveLoop::new(Arc::clone(sub), settings, self.cancel.clone());
            let handle = runners.spawn(runner.run(Arc::clone(connection)));
            slots.insert(handle.id(), index);
            reports.push(None);
        }

        let mut first_error: Option<RunError> = None;
        while let Some(joined) = runners.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, result)) => (id, result.map_err(RunError::from)),
                Err(join_err) => {
                    let id = join_err.id();
                    let key = slots
                        .get(&id)
                        .map(|&i| selected[i].key())
                        .unwrap_or_default();
                    (
                        id,
                        Err(RunError::Runner {
                            key,
                            reason: join_err.to_string(),
                        }),
                    )
                }
            };

            let Some(&index) = slots.get(&id) else {
                continue;
            };
            let sub = selected[index];

            match outcome {
                Ok(stats) => {
                    reports[index] = Some(RunnerReport {
                        key: sub.key(),
                        handler: sub.declared_name().to_string(),
                        stats,
                    });
                }
                Err(err) => {
                    error!(handler = %sub.declared_name(), key = %sub.key(), error = %err, "runner failed, stopping the others");
                    self.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(RunReport {
                runners: reports.into_iter().flatten().collect(),
            }),
        }
    }
}

fn credentials_kind(credentials: &Credentials) -> &'static str {
    match credentials {
        Credentials::WorkloadIdentity { .. } => "workload-identity",
        Credentials::ConnectionString(_) => "connection-string",
        Credentials::None => "none",
    }
}

/// Trigger `cancel` on SIGTERM.
fn watch_signals(cancel: CancelToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if wait_for_termination().await && cancel.cancel() {
            info!("termination signal received, stopping after current batches");
        }
    })
}

#[cfg(unix)]
async fn wait_for_termination() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => terminate.recv().await.is_some(),
        Err(err) => {
            warn!(error = %err, "cannot listen for SIGTERM");
            false
        }
    }
}

// No SIGTERM off unix; shutdown goes through the cancel token.
#[cfg(not(unix))]
async fn wait_for_termination() -> bool {
    false
}
