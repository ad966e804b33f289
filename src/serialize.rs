//! JSON-safe serialization and the introspection utilities built on top of
//! it: equality, fingerprinting, diffing, grouping, and summarizing.
//!
//! `TryError`'s fields are mostly private, so every function here goes
//! through its public accessors (and the crate-internal `cause_arc`) rather
//! than matching on the struct directly.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::context::{canonical_json_string, from_json};
use crate::lazy::LazyField;
use crate::TryError;

const MARKER: &str = "__tryError";

/// Serializes `error` to a JSON-safe record with the `__tryError: true`
/// sentinel. `cause`, when present, is recorded only by its `Display`
/// string: the core has no way to serialize an arbitrary
/// `dyn std::error::Error` back into a `TryError`, so a round-trip through
/// `deserialize_try_error` only reconstructs a `cause` when that string is
/// itself enough (see [`deserialize_try_error`]).
pub fn serialize_try_error(error: &TryError) -> Value {
    let mut map = Map::new();
    map.insert(MARKER.to_string(), Value::Bool(true));
    map.insert("type".to_string(), Value::String(error.error_type().to_string()));
    map.insert("message".to_string(), Value::String(error.message().to_string()));
    map.insert("source".to_string(), Value::String(error.source().to_string()));
    map.insert("timestamp".to_string(), Value::Number(error.timestamp().into()));
    map.insert(
        "stack".to_string(),
        error.stack().map(|s| Value::String(s.to_string())).unwrap_or(Value::Null),
    );
    map.insert(
        "context".to_string(),
        error.context().map(crate::context::to_canonical_json).unwrap_or(Value::Null),
    );
    map.insert(
        "cause".to_string(),
        match error.cause() {
            Some(cause) => Value::String(cause.to_string()),
            None => Value::Null,
        },
    );
    Value::Object(map)
}

/// Reconstructs a `TryError` from a serialized record iff the `__tryError`
/// marker is present and `type`/`message`/`source`/`timestamp` all
/// validate; otherwise `None`. The reconstructed error always has
/// `cause: None`, since a serialized cause is a string, not a re-runnable
/// error value: this is exactly what the round-trip law in spec §8 assumes
/// by restricting itself to errors produced without a cause.
pub fn deserialize_try_error(value: &Value) -> Option<TryError> {
    let obj = value.as_object()?;
    if obj.get(MARKER) != Some(&Value::Bool(true)) {
        return None;
    }
    let error_type = obj.get("type")?.as_str()?.to_string();
    let message = obj.get("message")?.as_str()?.to_string();
    let source = obj.get("source")?.as_str()?.to_string();
    let timestamp = obj.get("timestamp")?.as_u64()?;
    let stack = match obj.get("stack") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let context = match obj.get("context") {
        Some(Value::Null) | None => None,
        Some(v) => Some(from_json(v)),
    };
    Some(TryError::new(
        error_type,
        message,
        LazyField::eager(source),
        LazyField::eager(timestamp),
        LazyField::eager(stack),
        context,
        None,
    ))
}

fn context_json_of(error: &TryError) -> String {
    error.context().map(canonical_json_string).unwrap_or_else(|| "null".to_string())
}

fn cause_display(error: &TryError) -> Option<String> {
    error.cause().map(|c| c.to_string())
}

/// Structural equality over `type`, `message`, `source`, `timestamp`,
/// canonical-JSON context, and `cause`'s display string. `stack` is
/// excluded, matching spec §6.
pub fn are_try_errors_equal(a: &TryError, b: &TryError) -> bool {
    a.error_type() == b.error_type()
        && a.message() == b.message()
        && a.source() == b.source()
        && a.timestamp() == b.timestamp()
        && context_json_of(a) == context_json_of(b)
        && cause_display(a) == cause_display(b)
}

/// Clones `error`, preserving the resolved state of every lazily-deferred
/// field and the original `cause` reference (not just its display string).
pub fn clone_try_error(error: &TryError) -> TryError {
    error.clone()
}

/// `true` for every value this crate could have produced. Since `TryError`
/// is branded and unforgeable, this is only meaningful as a static type
/// check; it exists as a runtime predicate for callers holding a `&TryError`
/// obtained through a generic/dynamic path and wanting to confirm it is the
/// genuine article rather than, say, a `Box<dyn Error>` of some other
/// concrete type. Always `true` for an actual `&TryError`.
pub fn is_try_error(_error: &TryError) -> bool {
    true
}

/// `fields.join("|")`, substituting each field's string value (or its
/// canonical-JSON string, for `context`) in place of its name. Defaults to
/// `["type", "message"]`.
pub fn get_error_fingerprint(error: &TryError, fields: Option<&[&str]>) -> String {
    let fields = fields.unwrap_or(&["type", "message"]);
    fields
        .iter()
        .map(|field| field_value(error, field))
        .collect::<Vec<_>>()
        .join("|")
}

fn field_value(error: &TryError, field: &str) -> String {
    match field {
        "type" => error.error_type().to_string(),
        "message" => error.message().to_string(),
        "source" => error.source().to_string(),
        "timestamp" => error.timestamp().to_string(),
        "stack" => error.stack().unwrap_or_default().to_string(),
        "context" => context_json_of(error),
        "cause" => cause_display(error).unwrap_or_default(),
        other => format!("<unknown field: {other}>"),
    }
}

/// A field-by-field difference between two errors. `None` for fields that
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDiff {
    pub error_type: Option<(String, String)>,
    pub message: Option<(String, String)>,
    pub source: Option<(String, String)>,
    pub timestamp: Option<(u64, u64)>,
    pub context: Option<(String, String)>,
    pub cause: Option<(Option<String>, Option<String>)>,
}

impl ErrorDiff {
    pub fn is_empty(&self) -> bool {
        self.error_type.is_none()
            && self.message.is_none()
            && self.source.is_none()
            && self.timestamp.is_none()
            && self.context.is_none()
            && self.cause.is_none()
    }
}

fn differ<T: PartialEq + Clone>(a: &T, b: &T) -> Option<(T, T)> {
    if a == b {
        None
    } else {
        Some((a.clone(), b.clone()))
    }
}

/// Compares two errors field by field, returning an [`ErrorDiff`] with
/// `None` in every field that matched.
pub fn diff_errors(a: &TryError, b: &TryError) -> ErrorDiff {
    ErrorDiff {
        error_type: differ(&a.error_type().to_string(), &b.error_type().to_string()),
        message: differ(&a.message().to_string(), &b.message().to_string()),
        source: differ(&a.source().to_string(), &b.source().to_string()),
        timestamp: differ(&a.timestamp(), &b.timestamp()),
        context: differ(&context_json_of(a), &context_json_of(b)),
        cause: differ(&cause_display(a), &cause_display(b)),
    }
}

/// Partitions `errors` by `type`, preserving each group's relative order of
/// first appearance and the order of errors within a group.
pub fn group_errors<'a>(errors: &'a [TryError]) -> BTreeMap<String, Vec<&'a TryError>> {
    let mut groups: BTreeMap<String, Vec<&'a TryError>> = BTreeMap::new();
    for error in errors {
        groups.entry(error.error_type().to_string()).or_default().push(error);
    }
    groups
}

/// A compact, aggregate view over a slice of errors: counts per type and
/// the earliest/latest timestamp observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub total: usize,
    pub counts_by_type: BTreeMap<String, usize>,
    pub earliest_timestamp: Option<u64>,
    pub latest_timestamp: Option<u64>,
}

pub fn get_error_summary(errors: &[TryError]) -> ErrorSummary {
    let mut counts_by_type = BTreeMap::new();
    let mut earliest = None;
    let mut latest = None;
    for error in errors {
        *counts_by_type.entry(error.error_type().to_string()).or_insert(0) += 1;
        let ts = error.timestamp();
        earliest = Some(earliest.map_or(ts, |e: u64| e.min(ts)));
        latest = Some(latest.map_or(ts, |l: u64| l.max(ts)));
    }
    ErrorSummary {
        total: errors.len(),
        counts_by_type,
        earliest_timestamp: earliest,
        latest_timestamp: latest,
    }
}

/// Groups errors that share a fingerprint (default fields `["type",
/// "message"]`), returning each distinct fingerprint alongside the indices
/// (into `errors`) of every error that produced it, in order of first
/// occurrence.
pub fn correlate_errors(errors: &[TryError], fields: Option<&[&str]>) -> Vec<(String, Vec<usize>)> {
    let mut order: Vec<String> = Vec::new();
    let mut by_fingerprint: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, error) in errors.iter().enumerate() {
        let fingerprint = get_error_fingerprint(error, fields);
        if !by_fingerprint.contains_key(&fingerprint) {
            order.push(fingerprint.clone());
        }
        by_fingerprint.entry(fingerprint).or_default().push(index);
    }
    order
        .into_iter()
        .map(|fingerprint| {
            let indices = by_fingerprint.remove(&fingerprint).unwrap_or_default();
            (fingerprint, indices)
        })
        .collect()
}
