//! Per-message dispatch: decode, invoke, settle.
//!
//! A [`Dispatcher`] never fails outward. Decode errors, handler errors,
//! panics and timeouts all end in `abandon`, so one bad message cannot take
//! down its batch or its receive loop.

use std::any::Any;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::disposition::Disposition;
use crate::error::DispatchError;
use crate::subscription::Consumer;
use crate::transport::{Message, Receiver};

/// Dead-letter reason used when a handler rejects a message.
pub const REJECT_REASON: &str = "rejected by consumer";

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub disposition: Disposition,
    /// `false` when the receiver failed to apply the disposition.
    pub settled: bool,
}

/// Wraps a consumer for one subscription.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    consumer: Consumer,
    stream: String,
    group: String,
    handler_timeout: Option<Duration>,
}

impl Dispatcher {
    pub(crate) fn new(
        consumer: Consumer,
        stream: String,
        group: String,
        handler_timeout: Option<Duration>,
    ) -> Self {
        Self {
            consumer,
            stream,
            group,
            handler_timeout,
        }
    }

    /// Handle one received message and settle it on `receiver`.
    pub async fn handle(&self, receiver: &dyn Receiver, message: &Message) -> Dispatched {
        debug!(
            stream = %self.stream,
            group = %self.group,
            message_id = %message.id,
            delivery_count = message.delivery_count,
            "message received"
        );

        let disposition = match self.process(message).await {
            Ok(disposition) => disposition,
            Err(err) => {
                warn!(
                    handler = %self.consumer.name(),
                    message_id = %message.id,
                    error = %err,
                    "error processing message - abandoning"
                );
                Disposition::Retry
            }
        };

        let settled = self.apply(receiver, message, disposition).await;
        Dispatched {
            disposition,
            settled,
        }
    }

    async fn process(&self, message: &Message) -> Result<Disposition, DispatchError> {
        let body: Value = serde_json::from_slice(&message.body)?;
        let pending = self.consumer.invoke(body)?;

        debug!(
            handler = %self.consumer.name(),
            message_id = %message.id,
            "dispatching to handler"
        );

        // Own task, so a panicking handler only fails its own message.
        let mut task = tokio::spawn(pending);
        let joined = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return Err(DispatchError::TimedOut(limit));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(disposition)) => Ok(disposition),
            Ok(Err(err)) => Err(DispatchError::Handler(err)),
            Err(join_err) if join_err.is_panic() => Err(DispatchError::Panicked(
                panic_message(join_err.into_panic()),
            )),
            Err(join_err) => Err(DispatchError::Panicked(join_err.to_string())),
        }
    }

    async fn apply(
        &self,
        receiver: &dyn Receiver,
        message: &Message,
        disposition: Disposition,
    ) -> bool {
        let handler = self.consumer.name();
        let result = match disposition {
            Disposition::Ack => {
                info!(handler, message_id = %message.id, "handler returned successfully - completing");
                receiver.ack(message).await
            }
            Disposition::Retry => {
                info!(handler, message_id = %message.id, "handler returned retry - abandoning");
                receiver.abandon(message).await
            }
            Disposition::Reject => {
                info!(handler, message_id = %message.id, "handler returned reject - dead-lettering");
                receiver.reject(message, REJECT_REASON).await
            }
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    handler,
                    message_id = %message.id,
                    %disposition,
                    error = %err,
                    "failed to settle message"
                );
                false
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
