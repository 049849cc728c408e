//! Subscriptions: registered handlers bound to a stream and group.
//!
//! ## Handler Convention
//!
//! A handler named `on_<entity>_<event>` consumes the `<entity>-<event>`
//! stream. It takes one argument, either the stream's payload type or
//! `serde_json::Value`, and may return a [`Disposition`](crate::Disposition):
//!
//! ```ignore
//! // src/handlers/on_task_created.rs
//!
//! pub async fn on_task_created(event: TaskCreatedStateChangeEvent) -> Disposition {
//!     if event.title.is_empty() {
//!         return Disposition::Reject;
//!     }
//!     Disposition::Ack
//! }
//! ```
//!
//! Register it with an explicit stream/group when the convention does not
//! fit:
//!
//! ```ignore
//! app.register(
//!     consumer!(handlers::audit),
//!     SubscriptionOptions::new().stream("task-created").group("audit"),
//! )?;
//! ```

mod consumer;
mod registry;

use std::fmt;
use std::time::Duration;

pub use consumer::Consumer;
pub use registry::SubscriptionRegistry;

use crate::dispatch::Dispatcher;
use crate::event::PayloadShape;

/// Per-subscription overrides. Anything left unset uses the app defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionOptions {
    pub stream: Option<String>,
    pub group: Option<String>,
    pub max_batch_size: Option<usize>,
    pub max_wait_time: Option<Duration>,
    pub max_lease_renewal_duration: Option<Duration>,
    pub handler_timeout: Option<Duration>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume this stream instead of the one named by the handler.
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = Some(stream.into());
        self
    }

    /// Use this group instead of the default group.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = Some(wait);
        self
    }

    pub fn max_lease_renewal_duration(mut self, duration: Duration) -> Self {
        self.max_lease_renewal_duration = Some(duration);
        self
    }

    /// Abandon a message when its handler runs longer than `timeout`.
    pub fn handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }
}

/// One registered consumption unit. Immutable once registered.
#[derive(Debug)]
pub struct Subscription {
    stream_id: String,
    group_id: String,
    declared_name: String,
    payload: PayloadShape,
    max_batch_size: Option<usize>,
    max_wait_time: Option<Duration>,
    max_lease_renewal_duration: Option<Duration>,
    handler: Dispatcher,
}

impl Subscription {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Name of the handler this subscription wraps.
    pub fn declared_name(&self) -> &str {
        &self.declared_name
    }

    /// What the handler receives: raw JSON or a payload type.
    pub fn payload(&self) -> PayloadShape {
        self.payload
    }

    pub fn max_batch_size(&self) -> Option<usize> {
        self.max_batch_size
    }

    pub fn max_wait_time(&self) -> Option<Duration> {
        self.max_wait_time
    }

    pub fn max_lease_renewal_duration(&self) -> Option<Duration> {
        self.max_lease_renewal_duration
    }

    /// `"<stream>|<group>"`, the form used by subscription filters.
    pub fn key(&self) -> String {
        format!("{}|{}", self.stream_id, self.group_id)
    }

    pub(crate) fn handler(&self) -> &Dispatcher {
        &self.handler
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (stream={}, group={})",
            self.declared_name, self.stream_id, self.group_id
        )
    }
}
