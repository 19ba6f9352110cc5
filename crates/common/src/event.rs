//! The inbound event message consumed by projections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AggregateId, Sequence};

/// The lifecycle class of a domain event.
///
/// Kinds arrive as plain strings. Anything other than `"Defined"` or
/// `"Destroyed"` is kept verbatim in [`EventKind::Other`] rather than failing
/// to parse, because the bus broadcasts message types that no projection owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Defined,
    Destroyed,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Defined => "Defined",
            EventKind::Destroyed => "Destroyed",
            EventKind::Other(kind) => kind,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Other(_))
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "Defined" => EventKind::Defined,
            "Destroyed" => EventKind::Destroyed,
            _ => EventKind::Other(kind),
        }
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        EventKind::from(kind.to_string())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact emitted by an aggregate, as delivered by the bus.
///
/// On the wire the kind-specific fields sit next to the envelope fields:
///
/// ```json
/// { "aggregateType": "CatalogBrand", "aggregateId": "…", "kind": "Defined",
///   "sequence": 1, "name": "Acme" }
/// ```
///
/// Delivery is at-least-once, so the same event may be seen many times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Routing tag naming the aggregate that emitted the event.
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub kind: EventKind,
    pub sequence: Sequence,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl DomainEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: AggregateId,
        kind: impl Into<EventKind>,
        sequence: Sequence,
    ) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            kind: kind.into(),
            sequence,
            payload: Map::new(),
        }
    }

    /// Adds one kind-specific field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    /// Replaces the payload with the fields of a serializable value.
    ///
    /// Non-object values are rejected, since payload fields are flattened
    /// into the envelope.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(payload)? {
            Value::Object(fields) => {
                self.payload = fields;
                Ok(self)
            }
            Value::Null => {
                self.payload = Map::new();
                Ok(self)
            }
            other => Err(serde::de::Error::custom(format!(
                "event payload must be an object, got {other}"
            ))),
        }
    }

    /// Returns the payload as a JSON object value.
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}
