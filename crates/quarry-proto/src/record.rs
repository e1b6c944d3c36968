//! Result records returned by a search.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::value::Value;

/// One entity instance with its resolved relations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Column values in projection order.
    pub fields: Vec<(String, Value)>,
    /// Resolved relations, keyed by relation name.
    pub relations: BTreeMap<String, Related>,
}

/// The resolved side of a relation.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// Single-valued relation; `None` when no related entity exists.
    One(Option<Box<Record>>),
    /// Collection-valued relation.
    Many(Vec<Record>),
    /// Related primary keys only.
    Ids(Vec<Value>),
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record from column values.
    pub fn from_fields<S: Into<String>>(fields: impl IntoIterator<Item = (S, Value)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            relations: BTreeMap::new(),
        }
    }

    /// Column value by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Set a column value, replacing an existing one in place.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Builder form of [`Record::set`].
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value.into());
        self
    }

    /// Resolved relation by name.
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Attach a resolved relation.
    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// Walk a dotted relation path to the single-valued record it points at.
    pub fn follow(&self, path: &str) -> Option<&Record> {
        path.split('.').try_fold(self, |record, segment| match record.relation(segment)? {
            Related::One(Some(next)) => Some(next.as_ref()),
            _ => None,
        })
    }

    /// JSON object with columns first, then relations.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        for (name, related) in &self.relations {
            map.insert(name.clone(), related.to_json());
        }
        JsonValue::Object(map)
    }
}

impl Related {
    /// Related records, regardless of cardinality.
    pub fn records(&self) -> Vec<&Record> {
        match self {
            Related::One(Some(record)) => vec![record.as_ref()],
            Related::One(None) | Related::Ids(_) => Vec::new(),
            Related::Many(records) => records.iter().collect(),
        }
    }

    /// Number of related entities.
    pub fn len(&self) -> usize {
        match self {
            Related::One(Some(_)) => 1,
            Related::One(None) => 0,
            Related::Many(records) => records.len(),
            Related::Ids(ids) => ids.len(),
        }
    }

    /// Whether no related entity was found.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Related::One(Some(record)) => record.to_json(),
            Related::One(None) => JsonValue::Null,
            Related::Many(records) => JsonValue::Array(records.iter().map(Record::to_json).collect()),
            Related::Ids(ids) => JsonValue::Array(ids.iter().map(Value::to_json).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_replaces_in_place() {
        let mut record = Record::new().with("id", 1i64).with("name", "Alice");
        record.set("id", Value::Int64(2));
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.fields[0], ("id".to_string(), Value::Int64(2)));
    }

    #[test]
    fn test_follow_single_valued_path() {
        let country = Record::new().with("code", "FR");
        let mut address = Record::new().with("city", "Paris");
        address.set_relation("country", Related::One(Some(Box::new(country))));
        let mut user = Record::new().with("id", 1i64);
        user.set_relation("address", Related::One(Some(Box::new(address))));

        assert_eq!(
            user.follow("address.country").and_then(|r| r.get("code")),
            Some(&Value::String("FR".into()))
        );
        assert!(user.follow("address.missing").is_none());
    }

    #[test]
    fn test_to_json() {
        let mut user = Record::new().with("id", 1i64).with("name", "Alice");
        user.set_relation(
            "images",
            Related::Many(vec![Record::new().with("url", "a.png")]),
        );
        user.set_relation("mainPhoto", Related::One(None));
        user.set_relation("tags", Related::Ids(vec![Value::Int64(7)]));

        assert_eq!(
            user.to_json(),
            json!({
                "id": 1,
                "name": "Alice",
                "images": [{"url": "a.png"}],
                "mainPhoto": null,
                "tags": [7]
            })
        );
    }
}
