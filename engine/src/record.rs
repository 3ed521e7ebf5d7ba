//! Record types exchanged with the stores.

use crate::error::{Error, Result};
use crate::Id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the identity column.
pub const ID_FIELD: &str = "id";

/// Store-local timestamp columns, never compared across stores.
pub const TIMESTAMP_FIELDS: [&str; 2] = ["created_at", "updated_at"];

/// A single row: an optional identity plus arbitrary columns.
///
/// A record without an `id` has never been persisted and is a create
/// target; a record with an `id` is an update target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Create a record from a set of fields.
    ///
    /// An `id` key inside `fields` is lifted into the identity slot. Use
    /// [`EntityRecord::parse`] for client input, where an unreadable id
    /// must be rejected rather than dropped.
    pub fn new(mut fields: Map<String, Value>) -> Self {
        let id = fields.remove(ID_FIELD).as_ref().and_then(id_from_value);
        Self { id, fields }
    }

    /// Create a record from client-supplied fields.
    ///
    /// `id` may be null, an integral number or a string holding an integer.
    /// Anything else is an [`Error::InvalidPayload`].
    pub fn parse(mut fields: Map<String, Value>) -> Result<Self> {
        let id = match fields.remove(ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(value) => Some(id_from_value(&value).ok_or_else(|| {
                Error::InvalidPayload(format!("'{}' must be an integer, got {}", ID_FIELD, value))
            })?),
        };
        Ok(Self { id, fields })
    }

    /// Create a record that already carries an identity.
    pub fn with_id(id: Id, fields: Map<String, Value>) -> Self {
        let mut record = Self::new(fields);
        record.id = Some(id);
        record
    }

    /// Build a record from a JSON object. Non-objects yield an empty record.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            _ => Self::default(),
        }
    }

    /// Whether this record is an update target.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == ID_FIELD {
            return None;
        }
        self.fields.get(field)
    }

    /// Set a column value, returning the record for chaining.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        if field == ID_FIELD {
            self.id = id_from_value(&value);
        } else {
            self.fields.insert(field, value);
        }
    }

    /// Read an integer column (foreign keys are integers).
    pub fn get_id(&self, field: &str) -> Option<Id> {
        if field == ID_FIELD {
            return self.id;
        }
        self.fields.get(field).and_then(Value::as_i64)
    }

    /// All columns including `id`, as a flat map.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        if let Some(id) = self.id {
            map.insert(ID_FIELD.to_string(), Value::from(id));
        }
        map.extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        map
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.to_map())
    }

    /// The same record without its store-local timestamp columns.
    pub fn without_timestamps(&self) -> Self {
        let mut record = self.clone();
        for field in TIMESTAMP_FIELDS {
            record.fields.remove(field);
        }
        record
    }

    /// Equality on every column except the store-local timestamps.
    pub fn content_eq(&self, other: &EntityRecord) -> bool {
        self.without_timestamps() == other.without_timestamps()
    }
}

/// Read an identity from an integral number or a numeric string.
pub fn id_from_value(value: &Value) -> Option<Id> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as Id)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl From<Value> for EntityRecord {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_is_lifted_out_of_fields() {
        let record = EntityRecord::from(json!({"id": 4, "name": "Parts"}));
        assert_eq!(record.id, Some(4));
        assert!(!record.fields.contains_key("id"));
        assert_eq!(record.get("name"), Some(&json!("Parts")));
    }

    #[test]
    fn null_id_means_unsaved() {
        let record = EntityRecord::from(json!({"id": null, "name": "Parts"}));
        assert!(!record.is_persisted());

        let parsed: EntityRecord = serde_json::from_value(json!({"id": null, "a": 1})).unwrap();
        assert_eq!(parsed.id, None);
    }

    #[test]
    fn integral_and_numeric_string_ids_are_read() {
        let from_float = EntityRecord::from(json!({"id": 10.0, "name": "a"}));
        assert_eq!(from_float.id, Some(10));

        let fields = json!({"id": "10", "name": "a"});
        let Value::Object(fields) = fields else { unreachable!() };
        let parsed = EntityRecord::parse(fields).unwrap();
        assert_eq!(parsed.id, Some(10));
        assert!(!parsed.fields.contains_key("id"));
    }

    #[test]
    fn unreadable_id_is_rejected() {
        for bad in [json!("ten"), json!(10.5), json!(true), json!({"n": 1})] {
            let Value::Object(fields) = json!({"id": bad, "name": "a"}) else {
                unreachable!()
            };
            let err = EntityRecord::parse(fields).unwrap_err();
            assert!(matches!(err, Error::InvalidPayload(_)), "{:?}", err);
        }
    }

    #[test]
    fn serializes_flat() {
        let record = EntityRecord::from(json!({"name": "x"})).set("id", 9);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"id": 9, "name": "x"})
        );
    }

    #[test]
    fn content_eq_ignores_timestamps() {
        let a = EntityRecord::from(json!({"id": 1, "name": "a", "created_at": "t1"}));
        let b = EntityRecord::from(json!({"id": 1, "name": "a", "created_at": "t2"}));
        let c = EntityRecord::from(json!({"id": 1, "name": "b"}));
        assert!(a.content_eq(&b));
        assert!(!a.content_eq(&c));
    }
}
