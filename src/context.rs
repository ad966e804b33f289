//! Error context values.
//!
//! `ContextValue` is a small JSON-like tree with one extra variant,
//! [`ContextValue::Shared`], that lets two or more nodes point at the same
//! underlying cell. That is what makes a genuine reference cycle
//! constructible in safe Rust, which in turn is what [`to_canonical_json`]
//! and the serializer in `crate::serialize` need to exercise their
//! cycle-breaking logic against.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Number, Value};

/// A context value: scalars, arrays, maps, and shared (possibly cyclic) cells.
#[derive(Clone, Debug)]
pub enum ContextValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ContextValue>),
    Map(BTreeMap<String, ContextValue>),
    /// A reference to a shared, mutable cell. Two `Shared` values that wrap
    /// the same `Arc` are the same object for identity purposes, which is
    /// how a cycle is built: construct a cell, then store a `Shared` that
    /// points back to it somewhere inside its own contents.
    Shared(Arc<Mutex<ContextValue>>),
}

impl ContextValue {
    pub fn shared(inner: ContextValue) -> ContextValue {
        ContextValue::Shared(Arc::new(Mutex::new(inner)))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, ContextValue::Map(_))
    }

    /// Builds a fresh, cycle-free `Shared` cell so callers can wire up a
    /// self-reference after construction:
    ///
    /// ```
    /// use try_error::context::ContextValue;
    /// let cell = ContextValue::new_cell(ContextValue::Null);
    /// cell.set_cycle_to_self();
    /// ```
    pub fn new_cell(inner: ContextValue) -> ContextValue {
        ContextValue::shared(inner)
    }

    /// If `self` is a `Shared` cell, rewrites its contents to a map
    /// containing `key -> self`, producing a direct self-cycle. Used in
    /// tests and by callers who want a minimal cyclic context.
    pub fn set_cycle_to_self(&self) {
        if let ContextValue::Shared(cell) = self {
            let mut map = BTreeMap::new();
            map.insert("self".to_string(), ContextValue::Shared(cell.clone()));
            *cell.lock().expect("context cell poisoned") = ContextValue::Map(map);
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::String(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::String(s)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        ContextValue::Bool(b)
    }
}

impl From<f64> for ContextValue {
    fn from(n: f64) -> Self {
        ContextValue::Number(n)
    }
}

impl From<BTreeMap<String, ContextValue>> for ContextValue {
    fn from(m: BTreeMap<String, ContextValue>) -> Self {
        ContextValue::Map(m)
    }
}

/// Serializes a context graph to a plain JSON value, substituting
/// `"[Circular]"` for any `Shared` cell already on the current DFS path and
/// `"[Unstringifiable]"` for values that cannot be represented as JSON (none
/// currently exist in `ContextValue`, but the substitution point is kept so
/// future variants - e.g. raw bytes - have somewhere to land).
///
/// Grounded in spec.md §9's design note: "DFS with a visited set of object
/// identities; cycles emit `[Circular]`."
pub fn to_canonical_json(value: &ContextValue) -> Value {
    let mut on_path: Vec<usize> = Vec::new();
    walk(value, &mut on_path)
}

fn walk(value: &ContextValue, on_path: &mut Vec<usize>) -> Value {
    match value {
        ContextValue::Null => Value::Null,
        ContextValue::Bool(b) => Value::Bool(*b),
        ContextValue::Number(n) => Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        ContextValue::String(s) => Value::String(s.clone()),
        ContextValue::Array(items) => {
            Value::Array(items.iter().map(|v| walk(v, on_path)).collect())
        }
        ContextValue::Map(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), walk(v, on_path));
            }
            Value::Object(out)
        }
        ContextValue::Shared(cell) => {
            let identity = Arc::as_ptr(cell) as usize;
            if on_path.contains(&identity) {
                return Value::String("[Circular]".to_string());
            }
            on_path.push(identity);
            let inner = match cell.lock() {
                Ok(guard) => walk(&guard, on_path),
                Err(_) => Value::String("[Unstringifiable]".to_string()),
            };
            on_path.pop();
            inner
        }
    }
}

/// Canonical JSON string of a context, used as part of the dedup cache key
/// and equality comparisons. Deterministic because `ContextValue::Map` is a
/// `BTreeMap`, so key order is stable.
pub fn canonical_json_string(value: &ContextValue) -> String {
    to_canonical_json(value).to_string()
}

/// Rebuilds a `ContextValue` tree from a plain JSON value, for
/// deserialization. The result is always acyclic: JSON itself cannot
/// represent a cycle, so a `"[Circular]"` sentinel that was substituted
/// during serialization simply comes back as that literal string, not a
/// reconstructed cycle.
pub fn from_json(value: &Value) -> ContextValue {
    match value {
        Value::Null => ContextValue::Null,
        Value::Bool(b) => ContextValue::Bool(*b),
        Value::Number(n) => ContextValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => ContextValue::String(s.clone()),
        Value::Array(items) => ContextValue::Array(items.iter().map(from_json).collect()),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), from_json(v));
            }
            ContextValue::Map(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_context_serializes_to_finite_string() {
        let cell = ContextValue::new_cell(ContextValue::Null);
        cell.set_cycle_to_self();
        let json = to_canonical_json(&cell);
        let s = json.to_string();
        assert!(s.contains("[Circular]"));
        assert!(s.len() < 1000);
    }

    #[test]
    fn acyclic_map_round_trips_plainly() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), ContextValue::Number(1.0));
        map.insert("b".to_string(), ContextValue::String("x".to_string()));
        let value = ContextValue::Map(map);
        let json = to_canonical_json(&value);
        assert_eq!(json["a"], Value::Number(Number::from_f64(1.0).unwrap()));
        assert_eq!(json["b"], Value::String("x".to_string()));
    }

    #[test]
    fn two_shared_cells_pointing_to_same_value_is_not_a_false_cycle() {
        let leaf = Arc::new(Mutex::new(ContextValue::Number(42.0)));
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), ContextValue::Shared(leaf.clone()));
        map.insert("y".to_string(), ContextValue::Shared(leaf));
        let value = ContextValue::Map(map);
        let json = to_canonical_json(&value);
        assert_eq!(json["x"], Value::Number(Number::from_f64(42.0).unwrap()));
        assert_eq!(json["y"], Value::Number(Number::from_f64(42.0).unwrap()));
    }
}
