use std::collections::BTreeMap;

use tracing::info;

use super::EventType;
use crate::error::RegistrationError;
use crate::naming::stream_from_type_name;

/// Names ending with this suffix are abstract markers, not payloads.
pub const BASE_MARKER_SUFFIX: &str = "Base";

/// Bidirectional stream ↔ payload type map. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct EventTypeRegistry {
    by_stream: BTreeMap<String, EventType>,
}

impl EventTypeRegistry {
    /// Build the registry from the declared payload types.
    ///
    /// Base markers are skipped. An empty set is valid, but every later
    /// registration against it fails with `UnknownStream`.
    pub fn discover(
        types: impl IntoIterator<Item = EventType>,
    ) -> Result<Self, RegistrationError> {
        let types: Vec<EventType> = types
            .into_iter()
            .filter(|ty| !ty.is_base_marker())
            .collect();

        for ty in &types {
            info!(event_type = ty.name(), "found state event type");
        }

        Self::build_stream_map(types)
    }

    /// Resolve every type to its stream. Collisions are reported, never
    /// resolved silently. Re-declaring the same type is a no-op.
    pub fn build_stream_map(
        types: impl IntoIterator<Item = EventType>,
    ) -> Result<Self, RegistrationError> {
        let mut by_stream: BTreeMap<String, EventType> = BTreeMap::new();

        for ty in types {
            let stream = stream_from_type_name(ty.name())?;
            match by_stream.get(&stream) {
                Some(existing) if *existing == ty => {}
                Some(existing) => {
                    return Err(RegistrationError::DuplicateStream {
                        stream,
                        first: existing.name().to_string(),
                        second: ty.name().to_string(),
                    });
                }
                None => {
                    by_stream.insert(stream, ty);
                }
            }
        }

        Ok(Self { by_stream })
    }

    /// Payload type registered for a stream.
    pub fn payload_for_stream(&self, stream: &str) -> Option<EventType> {
        self.by_stream.get(stream).copied()
    }

    /// Stream a payload type is carried on.
    pub fn stream_for_type(&self, ty: &EventType) -> Option<&str> {
        self.by_stream
            .iter()
            .find(|(_, registered)| *registered == ty)
            .map(|(stream, _)| stream.as_str())
    }

    /// All known streams, sorted.
    pub fn streams(&self) -> Vec<&str> {
        self.by_stream.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_stream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_stream.is_empty()
    }
}
