mod event_payload;

use proc_macro::TokenStream;

/// Derive `EventPayload` (and `Payload`) for a deserializable struct.
///
/// The stream is resolved from the struct's name, so
/// `TaskCreatedStateChangeEvent` is carried on `task-created`.
///
/// ```ignore
/// #[derive(Deserialize, EventPayload)]
/// struct TaskCreatedStateChangeEvent {
///     entity_id: String,
///     title: String,
/// }
///
/// #[derive(Deserialize, EventPayload)]
/// #[event(entity_id = task_id)]
/// struct TaskMovedStateChangeEvent {
///     task_id: String,
///     column: String,
/// }
/// ```
///
/// The entity id comes from the field named by `#[event(entity_id = ...)]`,
/// a field marked `#[event(entity_id)]`, or a field named `entity_id`.
#[proc_macro_derive(EventPayload, attributes(event))]
pub fn derive_event_payload(input: TokenStream) -> TokenStream {
    event_payload::derive_event_payload(input)
}
