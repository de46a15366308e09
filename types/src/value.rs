//! The structured output model of a parse.

use std::collections::BTreeMap;

use serde::Serialize;

/// A parsed record: string keys to [`FieldValue`]s, ordered for stable
/// rendering and comparison in tests.
pub type Record = BTreeMap<String, FieldValue>;

/// A single decoded field.
///
/// Parsers may emit integers, floats, strings, raw byte runs, and nested
/// lists/maps of the same. Serializes to plain JSON values (bytes as an
/// array of numbers).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_plain_json() {
        let mut rec = Record::new();
        rec.insert("rpm".into(), FieldValue::Int(3000));
        rec.insert("ok".into(), FieldValue::Bool(true));
        rec.insert("unit".into(), FieldValue::from("rpm"));
        let json = serde_json::to_string(&rec).unwrap();
        assert_eq!(json, r#"{"ok":true,"rpm":3000,"unit":"rpm"}"#);
    }

    #[test]
    fn nested_values_serialize() {
        let rec = FieldValue::List(vec![
            FieldValue::Int(1),
            FieldValue::Float(2.5),
            FieldValue::Bytes(vec![0xFF]),
        ]);
        assert_eq!(serde_json::to_string(&rec).unwrap(), "[1,2.5,[255]]");
    }
}
