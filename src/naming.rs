//! Stream naming conventions.
//!
//! Streams are named in kebab-case. A handler called `on_task_created`
//! consumes the `task-created` stream, and so does a payload type called
//! `TaskCreatedStateChangeEvent`.

use crate::error::NamingError;

/// Prefix every convention-named handler starts with.
pub const HANDLER_PREFIX: &str = "on_";

/// Suffix every payload type name ends with.
pub const EVENT_TYPE_SUFFIX: &str = "StateChangeEvent";

/// Resolve the stream a handler consumes from its function name.
///
/// Path-qualified names (`handlers::on_task_created`) use the last segment.
///
/// ```
/// use topic_consumer::naming::stream_from_handler_name;
///
/// assert_eq!(stream_from_handler_name("on_task_created").unwrap(), "task-created");
/// assert!(stream_from_handler_name("task_created").is_err());
/// ```
pub fn stream_from_handler_name(name: &str) -> Result<String, NamingError> {
    let name = last_segment(name);
    let subject = name
        .strip_prefix(HANDLER_PREFIX)
        .ok_or_else(|| NamingError::MissingHandlerPrefix(name.to_string()))?;
    if subject.trim_matches('_').is_empty() {
        return Err(NamingError::EmptySubject(name.to_string()));
    }
    Ok(snake_to_kebab(subject))
}

/// Resolve the stream a payload type belongs to from its type name.
///
/// ```
/// use topic_consumer::naming::stream_from_type_name;
///
/// assert_eq!(
///     stream_from_type_name("TaskCreatedStateChangeEvent").unwrap(),
///     "task-created"
/// );
/// ```
pub fn stream_from_type_name(type_name: &str) -> Result<String, NamingError> {
    let type_name = last_segment(type_name);
    let subject = type_name
        .strip_suffix(EVENT_TYPE_SUFFIX)
        .ok_or_else(|| NamingError::MissingTypeSuffix(type_name.to_string()))?;
    if subject.is_empty() {
        return Err(NamingError::EmptySubject(type_name.to_string()));
    }
    Ok(pascal_to_kebab(subject))
}

/// `task_created` -> `task-created`. Repeated and edge underscores collapse.
pub fn snake_to_kebab(s: &str) -> String {
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// `TaskCreated` -> `task-created`. Acronym runs stay together
/// (`HTTPRequest` -> `http-request`).
pub fn pascal_to_kebab(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower);
            if boundary {
                out.push('-');
            }
        }
        out.push(ch.to_ascii_lowercase());
    }

    out
}

fn last_segment(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name).trim()
}
