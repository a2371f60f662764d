use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Column name to value, in deterministic column order.
pub type Columns = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(i64),
    EntityRef(EntityId),
    Bytes(Vec<u8>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::EntityRef(a), Self::EntityRef(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Change-detection equality: null against non-null always differs,
    /// otherwise plain value inequality.
    pub fn differs_from(&self, other: &FieldValue) -> bool {
        match (self.is_null(), other.is_null()) {
            (true, true) => false,
            (true, false) | (false, true) => true,
            (false, false) => self != other,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_entity_ref(&self) -> Option<EntityId> {
        match self {
            FieldValue::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Columns whose value differs between `old` and `new`. A column missing on
/// one side is compared as `Null`.
pub fn changed_columns<'a>(old: &'a Columns, new: &'a Columns) -> Vec<&'a str> {
    let mut changed = Vec::new();
    for (key, new_value) in new {
        let old_value = old.get(key).unwrap_or(&FieldValue::Null);
        if old_value.differs_from(new_value) {
            changed.push(key.as_str());
        }
    }
    for (key, old_value) in old {
        if !new.contains_key(key) && !old_value.is_null() {
            changed.push(key.as_str());
        }
    }
    changed
}

pub fn columns_to_msgpack(columns: &Columns) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(columns)
}

pub fn columns_from_msgpack(bytes: &[u8]) -> Result<Columns, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_against_value_always_differs() {
        assert!(FieldValue::Null.differs_from(&FieldValue::Text(String::new())));
        assert!(FieldValue::Integer(0).differs_from(&FieldValue::Null));
        assert!(!FieldValue::Null.differs_from(&FieldValue::Null));
    }

    #[test]
    fn equal_values_do_not_differ() {
        assert!(!FieldValue::from("Widget").differs_from(&FieldValue::from("Widget")));
        assert!(FieldValue::from("Widget").differs_from(&FieldValue::from("Gadget")));
        assert!(!FieldValue::Float(1.5).differs_from(&FieldValue::Float(1.5)));
    }

    #[test]
    fn different_variants_differ() {
        assert!(FieldValue::Integer(1).differs_from(&FieldValue::Timestamp(1)));
    }

    #[test]
    fn changed_columns_covers_both_sides() {
        let mut old = Columns::new();
        old.insert("name".into(), "Widget".into());
        old.insert("color".into(), "red".into());
        old.insert("gone".into(), FieldValue::Integer(3));

        let mut new = Columns::new();
        new.insert("name".into(), "Widget".into());
        new.insert("color".into(), "blue".into());
        new.insert("added".into(), FieldValue::Boolean(true));

        let mut changed = changed_columns(&old, &new);
        changed.sort();
        assert_eq!(changed, vec!["added", "color", "gone"]);
    }

    #[test]
    fn missing_column_equals_null() {
        let old = Columns::new();
        let mut new = Columns::new();
        new.insert("notes".into(), FieldValue::Null);
        assert!(changed_columns(&old, &new).is_empty());
    }

    #[test]
    fn columns_msgpack_roundtrip() {
        let mut cols = Columns::new();
        cols.insert("id".into(), FieldValue::Integer(7));
        cols.insert("owner".into(), FieldValue::EntityRef(EntityId::new()));
        let bytes = columns_to_msgpack(&cols).unwrap();
        assert_eq!(columns_from_msgpack(&bytes).unwrap(), cols);
    }
}
