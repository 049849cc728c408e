//! Subscription-driven topic consumer.
//!
//! Register handlers for event streams, then [`ConsumerApp::run`] pulls
//! batches from one receiver per subscription and settles every message as
//! acknowledged, retried or rejected based on what its handler returned.

// Lets `#[derive(EventPayload)]` expand to `topic_consumer::...` inside this crate too.
extern crate self as topic_consumer;

mod app;
mod cancel;
pub mod config;
mod dispatch;
mod disposition;
mod error;
mod event;
pub mod naming;
pub mod runner;
mod subscription;
pub mod transport;

pub use app::{ConsumerApp, RunReport, RunnerReport};
pub use cancel::CancelToken;
pub use config::{ConnectionSettings, ConsumerConfig, SubscriptionFilter};
pub use dispatch::{Dispatched, Dispatcher, REJECT_REASON};
pub use disposition::{Disposition, HandlerOutput};
pub use error::{
    ConfigError, DispatchError, NamingError, RegistrationError, RunError, TransportError,
};
pub use event::{EventPayload, EventType, EventTypeRegistry, Payload, PayloadShape};
pub use runner::{RunnerState, RunnerStats};
pub use subscription::{Consumer, Subscription, SubscriptionOptions, SubscriptionRegistry};

// Derive macro shares its name with the trait, like serde's.
pub use topic_consumer_macros::EventPayload;
