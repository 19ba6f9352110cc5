//! Entities stored in the read model and their raw document form.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{AggregateId, Result};

/// A projection as the store sees it: the aggregate id and a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: AggregateId,
    pub document: Value,
}

impl Record {
    pub fn new(id: AggregateId, document: Value) -> Self {
        Self { id, document }
    }

    /// Returns a top-level field of the document.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.document.get(name)
    }
}

/// A denormalized view keyed by the id of the aggregate it was projected from.
///
/// Only projections write entities; query callers receive copies.
pub trait ReadModelEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the collection entities of this type live in.
    const COLLECTION: &'static str;

    fn id(&self) -> AggregateId;

    fn to_record(&self) -> Result<Record> {
        Ok(Record::new(self.id(), serde_json::to_value(self)?))
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(record.document)?)
    }
}
