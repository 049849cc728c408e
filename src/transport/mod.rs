//! Broker transport abstractions.
//!
//! The consumer runtime only talks to a broker through these traits.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Broker                              │
//! │  connect(credentials) -> Connection                         │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Connection                            │
//! │  lease_renewer(budget) / open_receiver(target) / close()    │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Receiver                             │
//! │  receive_batch / ack / abandon / reject / close             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                    │
//!          ▼                                    ▼
//! ┌──────────────────┐              ┌─────────────────────────┐
//! │  InMemoryBroker  │              │ Service Bus, Kafka, ... │
//! │   (included)     │              │       (external)        │
//! └──────────────────┘              └─────────────────────────┘
//! ```

#[cfg(feature = "in-memory")]
mod in_memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

#[cfg(feature = "in-memory")]
pub use in_memory::{InMemoryBroker, Lifecycle, Operation, DEFAULT_MAX_DELIVERY_COUNT};

/// A message delivered by a receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Broker-assigned identifier
    pub id: String,
    /// Serialized body (JSON for this runtime)
    pub body: Vec<u8>,
    /// How many times the message has been delivered, starting at 1
    pub delivery_count: u32,
    /// Optional application properties
    pub metadata: Option<Vec<(String, String)>>,
}

impl Message {
    pub fn new(id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            body,
            delivery_count: 0,
            metadata: None,
        }
    }

    /// Create a message with a string body.
    pub fn with_string_body(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(id, body.into().into_bytes())
    }

    /// Create a message with a JSON-serialized body.
    pub fn json<T: serde::Serialize>(
        id: impl Into<String>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, serde_json::to_vec(body)?))
    }

    /// Add metadata to the message.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// How the connection authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Federated workload identity against a broker namespace.
    WorkloadIdentity {
        namespace: String,
        client_id: String,
        tenant_id: String,
        authority_host: String,
        token_file: String,
    },
    /// A static connection secret.
    ConnectionString(String),
    /// Nothing configured. Brokers that need credentials fail on connect.
    None,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::WorkloadIdentity {
                namespace,
                client_id,
                tenant_id,
                ..
            } => f
                .debug_struct("WorkloadIdentity")
                .field("namespace", namespace)
                .field("client_id", client_id)
                .field("tenant_id", tenant_id)
                .finish_non_exhaustive(),
            Credentials::ConnectionString(_) => f.write_str("ConnectionString(<redacted>)"),
            Credentials::None => f.write_str("None"),
        }
    }
}

/// The stream/group pair a receiver is bound to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReceiverTarget {
    pub stream: String,
    pub group: String,
}

impl ReceiverTarget {
    pub fn new(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for ReceiverTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.stream, self.group)
    }
}

/// Entry point to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a session. The caller closes it exactly once.
    async fn connect(&self, credentials: &Credentials)
        -> Result<Arc<dyn Connection>, TransportError>;
}

/// An open broker session.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Create a lease renewer that keeps message locks alive for at most
    /// `max_duration` while handlers run.
    async fn lease_renewer(
        &self,
        max_duration: Duration,
    ) -> Result<Arc<dyn LeaseRenewer>, TransportError>;

    /// Open a receiver on a stream/group, registering delivered messages
    /// with `renewer`.
    async fn open_receiver(
        &self,
        target: &ReceiverTarget,
        renewer: Arc<dyn LeaseRenewer>,
    ) -> Result<Arc<dyn Receiver>, TransportError>;

    /// Release the session.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Keeps message locks alive during long handler runs.
#[async_trait]
pub trait LeaseRenewer: Send + Sync {
    fn max_duration(&self) -> Duration;

    /// Stop renewing and release the renewer.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Pull-based receiver bound to one stream/group.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Fetch up to `max_count` messages, waiting at most `max_wait` for the
    /// first one. An empty batch is not an error.
    async fn receive_batch(
        &self,
        max_count: usize,
        max_wait: Duration,
    ) -> Result<Vec<Message>, TransportError>;

    /// Mark a message complete.
    async fn ack(&self, message: &Message) -> Result<(), TransportError>;

    /// Release a message for redelivery.
    async fn abandon(&self, message: &Message) -> Result<(), TransportError>;

    /// Move a message to the dead-letter destination.
    async fn reject(&self, message: &Message, reason: &str) -> Result<(), TransportError>;

    /// Release the receiver.
    async fn close(&self) -> Result<(), TransportError>;
}
