//! Error types for registration, dispatch, transport and run phases.

use std::error::Error;

use thiserror::Error;

/// A handler or payload type name does not follow the naming convention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    /// Handler names must look like `on_<entity>_<event>`.
    #[error("handler name `{0}` must be in the form on_<entity-name>_<event-name>")]
    MissingHandlerPrefix(String),
    /// Payload type names must end with `StateChangeEvent`.
    #[error("event type name `{0}` must end with StateChangeEvent")]
    MissingTypeSuffix(String),
    /// Prefix or suffix present but nothing left to name the stream with.
    #[error("`{0}` does not name a stream")]
    EmptySubject(String),
}

/// Errors raised while building the event type registry or registering a
/// consumer. All of these are fatal and surface before `run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// No payload type is registered for the resolved stream.
    #[error("no event type found to match stream `{0}`")]
    UnknownStream(String),
    /// Two payload types resolve to the same stream.
    #[error("event types `{first}` and `{second}` both resolve to stream `{stream}`")]
    DuplicateStream {
        stream: String,
        first: String,
        second: String,
    },
    /// Neither an explicit group nor a default group was configured.
    #[error("no subscription group for `{0}`: pass one explicitly or set a default group")]
    MissingGroup(String),
    /// The handler's declared payload is neither raw nor the stream's type.
    #[error("handler `{handler}` takes `{found}` but stream payload type is `{expected}`")]
    PayloadTypeMismatch {
        handler: String,
        expected: String,
        found: String,
    },
}

/// Per-message failures. The dispatcher always resolves these to a retry.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Body is not JSON or does not satisfy the payload type.
    #[error("deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn Error + Send + Sync>),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// The handler exceeded the subscription's handler timeout.
    #[error("handler timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Errors reported by a broker transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("lease renewal failed: {0}")]
    LeaseRenewal(String),
    /// Settling (ack/abandon/reject) a message failed.
    #[error("settle failed for message {message_id}: {reason}")]
    Settle { message_id: String, reason: String },
    #[error("resource closed: {0}")]
    Closed(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("invalid subscription filter entry `{0}`: expected <stream>|<group>")]
    InvalidFilter(String),
}

/// Errors returned by `ConsumerApp::run`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no consumers registered: register at least one handler before run")]
    NoSubscriptions,
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A runner task ended abnormally (panicked or was aborted).
    #[error("runner for {key} ended abnormally: {reason}")]
    Runner { key: String, reason: String },
}
