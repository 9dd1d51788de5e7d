//! Composable event filters

use serde_json::Value;

use super::event::{Event, EventPriority};

/// Predicate over events, composable with AND / OR / NOT.
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Exact event-type match
    Type(String),
    /// Membership in a type set
    TypeSet(Vec<String>),
    /// Priority at or above the floor
    MinPriority(EventPriority),
    /// Data field equals the value
    DataEquals { key: String, value: Value },
    /// Data field exists
    DataExists(String),
    /// Metadata field equals the value
    MetadataEquals { key: String, value: String },
    /// Wildcard on the type string: `prefix*`, `*suffix`, `*sub*`
    Wildcard(String),
    All(Vec<EventFilter>),
    Any(Vec<EventFilter>),
    Not(Box<EventFilter>),
}

impl EventFilter {
    pub fn accepts(&self, event: &Event) -> bool {
        match self {
            EventFilter::Type(ty) => event.event_type == *ty,
            EventFilter::TypeSet(types) => types.iter().any(|t| event.event_type == *t),
            EventFilter::MinPriority(floor) => event.priority >= *floor,
            EventFilter::DataEquals { key, value } => event.data.get(key) == Some(value),
            EventFilter::DataExists(key) => event.data.contains_key(key),
            EventFilter::MetadataEquals { key, value } => {
                event.metadata_str(key) == Some(value.as_str())
            }
            EventFilter::Wildcard(pattern) => wildcard_match(pattern, &event.event_type),
            EventFilter::All(filters) => filters.iter().all(|f| f.accepts(event)),
            EventFilter::Any(filters) => filters.iter().any(|f| f.accepts(event)),
            EventFilter::Not(inner) => !inner.accepts(event),
        }
    }

    pub fn and(self, other: EventFilter) -> EventFilter {
        EventFilter::All(vec![self, other])
    }

    pub fn or(self, other: EventFilter) -> EventFilter {
        EventFilter::Any(vec![self, other])
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> EventFilter {
        EventFilter::Not(Box::new(self))
    }
}

/// Match `prefix*`, `*suffix`, `*sub*`, or an exact string.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(rest), _) if rest.is_empty() => true, // bare "*"
        (Some(_), Some(_)) => {
            // *sub* - strip both stars
            let sub = &pattern[1..pattern.len() - 1];
            text.contains(sub)
        }
        (Some(suffix), None) => text.ends_with(suffix),
        (None, Some(prefix)) => text.starts_with(prefix),
        (None, None) => text == pattern,
    }
}
