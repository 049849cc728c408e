use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Consumer, Subscription, SubscriptionOptions};
use crate::dispatch::Dispatcher;
use crate::error::RegistrationError;
use crate::event::{EventTypeRegistry, PayloadShape};
use crate::naming::stream_from_handler_name;

/// Ordered set of subscriptions, built before `run` and read-only after.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    event_types: EventTypeRegistry,
    default_group: Option<String>,
    subscriptions: Vec<Arc<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new(event_types: EventTypeRegistry, default_group: Option<String>) -> Self {
        Self {
            event_types,
            default_group,
            subscriptions: Vec::new(),
        }
    }

    /// Register a consumer.
    ///
    /// The stream comes from `options.stream` or the handler's name; the
    /// group from `options.group` or the default group. The handler's
    /// declared payload must be raw JSON or the stream's payload type.
    pub fn register(
        &mut self,
        consumer: Consumer,
        options: SubscriptionOptions,
    ) -> Result<Arc<Subscription>, RegistrationError> {
        let declared_name = consumer.name().to_string();

        let stream_id = match options.stream {
            Some(stream) => stream,
            None => {
                let stream = stream_from_handler_name(&declared_name)?;
                debug!(handler = %declared_name, %stream, "stream not set, using stream from handler name");
                stream
            }
        };

        let expected = self
            .event_types
            .payload_for_stream(&stream_id)
            .ok_or_else(|| RegistrationError::UnknownStream(stream_id.clone()))?;

        let group_id = options
            .group
            .or_else(|| self.default_group.clone())
            .ok_or_else(|| RegistrationError::MissingGroup(declared_name.clone()))?;

        match consumer.shape() {
            PayloadShape::Raw => {}
            PayloadShape::Typed(found) if found == expected => {}
            PayloadShape::Typed(found) => {
                return Err(RegistrationError::PayloadTypeMismatch {
                    handler: declared_name,
                    expected: expected.name().to_string(),
                    found: found.name().to_string(),
                });
            }
        }

        if self
            .subscriptions
            .iter()
            .any(|s| s.stream_id == stream_id && s.group_id == group_id)
        {
            warn!(
                handler = %declared_name,
                stream = %stream_id,
                group = %group_id,
                "stream/group already has a consumer; both will compete for its messages"
            );
        }

        info!(handler = %declared_name, stream = %stream_id, group = %group_id, "found consumer");

        let subscription = Arc::new(Subscription {
            payload: consumer.shape(),
            handler: Dispatcher::new(
                consumer,
                stream_id.clone(),
                group_id.clone(),
                options.handler_timeout,
            ),
            stream_id,
            group_id,
            declared_name,
            max_batch_size: options.max_batch_size,
            max_wait_time: options.max_wait_time,
            max_lease_renewal_duration: options.max_lease_renewal_duration,
        });

        self.subscriptions.push(Arc::clone(&subscription));
        Ok(subscription)
    }

    /// Subscriptions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Subscription>> {
        self.subscriptions.iter()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn event_types(&self) -> &EventTypeRegistry {
        &self.event_types
    }
}
