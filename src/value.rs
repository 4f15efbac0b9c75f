//! The closed structured-value sum used throughout the event pipeline.
//!
//! Application code hands the façade arbitrary `serde_json`-ish kwargs;
//! internally everything collapses to this small, closed type so stages
//! never have to guess at dynamic typing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// `null | bool | int | float | string | list<value> | map<string,value>`.
///
/// `Map` uses a `BTreeMap` rather than a `HashMap` so serialized output has
/// a stable key order, useful for signable/audit records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// The `data` / `diagnostics` / `context` nested mapping type.
pub type Data = BTreeMap<String, Value>;

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Data> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Data> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Deep-merges `other` into `self`, with `other` winning on key
    /// collision for scalar leaves and maps merging recursively.
    ///
    /// Used by enrichers that add nested fields, and by the envelope builder
    /// when flattening a user-supplied `data={}` kwarg.
    pub fn deep_merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Map(a), Value::Map(b)) => {
                for (k, v) in b {
                    match a.get_mut(&k) {
                        Some(existing) => existing.deep_merge(v),
                        None => {
                            a.insert(k, v);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }

    /// Recursively masks every scalar leaf, used to guarantee a
    /// sensitive-container kwarg is masked before it is ever enqueued.
    pub fn mask_in_place(&mut self) {
        match self {
            Value::Null => {}
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                *self = Value::String("***".to_string());
            }
            Value::List(items) => {
                for item in items {
                    item.mask_in_place();
                }
            }
            Value::Map(map) => {
                for v in map.values_mut() {
                    v.mask_in_place();
                }
            }
        }
    }

    /// Walks the tree, counting keys and tracking depth, for the redactor
    /// guardrails (`max_depth`, `max_keys_scanned`).
    pub fn walk_mut<F: FnMut(&[String], &mut Value, usize) -> bool>(&mut self, visit: &mut F) {
        fn inner<F: FnMut(&[String], &mut Value, usize) -> bool>(
            path: &mut Vec<String>,
            value: &mut Value,
            depth: usize,
            budget: &mut usize,
            visit: &mut F,
        ) {
            if *budget == 0 {
                return;
            }
            *budget -= 1;
            if !visit(path, value, depth) {
                return;
            }
            if let Value::Map(map) = value {
                for (k, v) in map.iter_mut() {
                    path.push(k.clone());
                    inner(path, v, depth + 1, budget, visit);
                    path.pop();
                }
            } else if let Value::List(items) = value {
                for v in items.iter_mut() {
                    inner(path, v, depth + 1, budget, visit);
                }
            }
        }
        let mut path = Vec::new();
        let mut budget = usize::MAX;
        inner(&mut path, self, 0, &mut budget, visit);
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for JsonValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Int(i) => JsonValue::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s),
            Value::List(items) => JsonValue::Array(items.into_iter().map(JsonValue::from).collect()),
            Value::Map(map) => {
                JsonValue::Object(map.into_iter().map(|(k, v)| (k, JsonValue::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(_) | Value::Map(_) => {
                write!(f, "{}", serde_json::to_string(&JsonValue::from(self.clone())).unwrap_or_default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overrides_leaves_and_recurses_into_maps() {
        let mut a: Value = serde_json::json!({"x": 1, "nested": {"a": 1, "b": 2}}).into();
        let b: Value = serde_json::json!({"x": 2, "nested": {"b": 3, "c": 4}}).into();
        a.deep_merge(b);
        let map = a.as_map().unwrap();
        assert_eq!(map.get("x"), Some(&Value::Int(2)));
        let nested = map.get("nested").unwrap().as_map().unwrap();
        assert_eq!(nested.get("a"), Some(&Value::Int(1)));
        assert_eq!(nested.get("b"), Some(&Value::Int(3)));
        assert_eq!(nested.get("c"), Some(&Value::Int(4)));
    }

    #[test]
    fn mask_in_place_replaces_every_scalar_leaf() {
        let mut v: Value = serde_json::json!({"ssn": "123-45-6789", "nested": {"pin": 1234}}).into();
        v.mask_in_place();
        let map = v.as_map().unwrap();
        assert_eq!(map.get("ssn"), Some(&Value::String("***".to_string())));
        let nested = map.get("nested").unwrap().as_map().unwrap();
        assert_eq!(nested.get("pin"), Some(&Value::String("***".to_string())));
    }

    #[test]
    fn json_roundtrip_preserves_structure() {
        let original = serde_json::json!({"a": 1, "b": [1, 2, "x"], "c": null});
        let value: Value = original.clone().into();
        let back: JsonValue = value.into();
        assert_eq!(original, back);
    }
}
