//! Event payload types and the stream ↔ payload type registry.
//!
//! Payload types are declared explicitly: derive [`EventPayload`] on a
//! `Deserialize` struct and hand [`EventType::of`] descriptors to
//! [`EventTypeRegistry::discover`].
//!
//! ```ignore
//! use serde::Deserialize;
//! use topic_consumer::{EventPayload, EventType, EventTypeRegistry};
//!
//! #[derive(Debug, Deserialize, EventPayload)]
//! struct TaskCreatedStateChangeEvent {
//!     entity_id: String,
//!     title: String,
//! }
//!
//! let registry = EventTypeRegistry::discover([
//!     EventType::of::<TaskCreatedStateChangeEvent>(),
//! ])?;
//! assert!(registry.payload_for_stream("task-created").is_some());
//! ```

mod registry;

use std::any::TypeId;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use registry::{EventTypeRegistry, BASE_MARKER_SUFFIX};

/// A declared notification shape carried on a stream.
///
/// Usually derived with `#[derive(EventPayload)]`, which also implements
/// [`Payload`] for the type.
pub trait EventPayload: Payload {
    /// The type's name, used to resolve its stream.
    const TYPE_NAME: &'static str;

    /// Identifier of the entity whose state changed.
    fn entity_id(&self) -> &str;
}

/// Anything a handler can declare as its single argument.
pub trait Payload: DeserializeOwned + Send + 'static {
    fn shape() -> PayloadShape;
}

/// Raw JSON is passed through without coercion.
impl Payload for Value {
    fn shape() -> PayloadShape {
        PayloadShape::Raw
    }
}

/// What a handler declared as its argument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `serde_json::Value`, the parsed body unchanged.
    Raw,
    /// A concrete payload type.
    Typed(EventType),
}

impl fmt::Display for PayloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadShape::Raw => f.write_str("serde_json::Value"),
            PayloadShape::Typed(ty) => f.write_str(ty.name()),
        }
    }
}

/// Descriptor for a payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType {
    name: &'static str,
    type_id: TypeId,
}

impl EventType {
    /// Describe a payload type.
    pub fn of<T: EventPayload>() -> Self {
        Self {
            name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Abstract marker types are named `...Base` and never get a stream.
    pub fn is_base_marker(&self) -> bool {
        self.name.ends_with(BASE_MARKER_SUFFIX)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
