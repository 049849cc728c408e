use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::disposition::{Disposition, HandlerOutput};
use crate::event::{Payload, PayloadShape};

pub(crate) type HandlerResult = Result<Disposition, Box<dyn Error + Send + Sync>>;

type InvokeFn =
    dyn Fn(Value) -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error> + Send + Sync;

/// A named handler function together with its declared payload type.
///
/// The handler takes exactly one argument: either `serde_json::Value` for
/// the raw parsed body, or an [`EventPayload`](crate::EventPayload) type.
///
/// ```ignore
/// async fn on_task_created(event: TaskCreatedStateChangeEvent) -> Disposition {
///     println!("task {} created", event.entity_id);
///     Disposition::Ack
/// }
///
/// let consumer = topic_consumer::consumer!(on_task_created);
/// assert_eq!(consumer.name(), "on_task_created");
/// ```
#[derive(Clone)]
pub struct Consumer {
    name: String,
    shape: PayloadShape,
    invoke: Arc<InvokeFn>,
}

impl Consumer {
    /// Wrap an async handler. `name` follows the `on_<subject>` convention
    /// unless the stream is given explicitly at registration.
    pub fn new<P, F, Fut, O>(name: impl Into<String>, handler: F) -> Self
    where
        P: Payload,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: HandlerOutput,
    {
        let name: String = name.into().split_whitespace().collect();
        let invoke = move |body: Value| -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error> {
            let payload: P = serde_json::from_value(body)?;
            let pending = handler(payload);
            Ok(async move { pending.await.into_disposition() }.boxed())
        };

        Self {
            name,
            shape: P::shape(),
            invoke: Arc::new(invoke),
        }
    }

    /// The handler's name, as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler's declared argument type.
    pub fn shape(&self) -> PayloadShape {
        self.shape
    }

    /// Coerce `body` into the declared payload and start the handler.
    pub(crate) fn invoke(
        &self,
        body: Value,
    ) -> Result<BoxFuture<'static, HandlerResult>, serde_json::Error> {
        (self.invoke)(body)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Build a [`Consumer`] from a handler function, naming it after the
/// function.
///
/// ```ignore
/// app.consume(topic_consumer::consumer!(handlers::on_task_created))?;
/// ```
#[macro_export]
macro_rules! consumer {
    ($($seg:ident)::+) => {
        $crate::Consumer::new(stringify!($($seg)::+), $($seg)::+)
    };
}
