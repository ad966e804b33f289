//! Conventional-shape constructors for the taxonomy's user-defined tags.
//!
//! `create_error` accepts any string as a type tag, but a handful of tags
//! recur often enough to warrant a constructor that fills in a
//! conventional context shape instead of leaving every caller to
//! reinvent the key names — the same role the teacher's category-specific
//! `*_err!` macros played, adapted here as plain functions since this
//! crate's factory takes runtime strings rather than macro-time literals.

use std::collections::BTreeMap;

use crate::context::ContextValue;
use crate::factory::{create_error_with, ErrorOptions};
use crate::TryError;

fn context_of(fields: Vec<(&str, ContextValue)>) -> ContextValue {
    let mut map = BTreeMap::new();
    for (key, value) in fields {
        map.insert(key.to_string(), value);
    }
    ContextValue::Map(map)
}

/// An error about a specific, identifiable entity (`entity_type`/`entity_id`
/// recorded in context), e.g. "user 42 not found".
#[track_caller]
pub fn entity_error(entity_type: impl Into<String>, entity_id: impl Into<String>, message: impl Into<String>) -> TryError {
    let entity_type = entity_type.into();
    let entity_id = entity_id.into();
    let context = context_of(vec![
        ("entityType", ContextValue::String(entity_type)),
        ("entityId", ContextValue::String(entity_id)),
    ]);
    create_error_with("EntityError", message, ErrorOptions::new().with_context(context))
}

/// An error about a numeric amount falling outside an expected range
/// (`value`, and optionally `min`/`max`, recorded in context).
#[track_caller]
pub fn amount_error(value: f64, min: Option<f64>, max: Option<f64>, message: impl Into<String>) -> TryError {
    let mut fields = vec![("value", ContextValue::Number(value))];
    if let Some(min) = min {
        fields.push(("min", ContextValue::Number(min)));
    }
    if let Some(max) = max {
        fields.push(("max", ContextValue::Number(max)));
    }
    let context = context_of(fields);
    create_error_with("AmountError", message, ErrorOptions::new().with_context(context))
}

/// An error surfaced by calling out to an external system (`service`, and
/// optionally `status_code`, recorded in context).
#[track_caller]
pub fn external_error(service: impl Into<String>, status_code: Option<i64>, message: impl Into<String>) -> TryError {
    let mut fields = vec![("service", ContextValue::String(service.into()))];
    if let Some(status_code) = status_code {
        fields.push(("statusCode", ContextValue::Number(status_code as f64)));
    }
    let context = context_of(fields);
    create_error_with("ExternalError", message, ErrorOptions::new().with_context(context))
}

/// An error about a field failing validation (`field`, and optionally
/// `constraint`, recorded in context).
#[track_caller]
pub fn validation_error(field: impl Into<String>, constraint: Option<&str>, message: impl Into<String>) -> TryError {
    let mut fields = vec![("field", ContextValue::String(field.into()))];
    if let Some(constraint) = constraint {
        fields.push(("constraint", ContextValue::String(constraint.to_string())));
    }
    let context = context_of(fields);
    create_error_with("ValidationError", message, ErrorOptions::new().with_context(context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_error_carries_entity_context() {
        crate::config::reset_config();
        let err = entity_error("User", "42", "not found");
        assert_eq!(err.error_type(), "EntityError");
        let json = err.context().map(crate::context::canonical_json_string).unwrap();
        assert!(json.contains("\"entityId\":\"42\""));
    }

    #[test]
    fn amount_error_carries_bounds_when_given() {
        crate::config::reset_config();
        let err = amount_error(-5.0, Some(0.0), None, "amount must be positive");
        let json = err.context().map(crate::context::canonical_json_string).unwrap();
        assert!(json.contains("\"min\":0"));
        assert!(!json.contains("max"));
    }

    #[test]
    fn validation_error_carries_field_name() {
        crate::config::reset_config();
        let err = validation_error("email", Some("format"), "invalid email");
        assert_eq!(err.error_type(), "ValidationError");
        let json = err.context().map(crate::context::canonical_json_string).unwrap();
        assert!(json.contains("\"field\":\"email\""));
    }

    #[test]
    fn external_error_carries_service_name() {
        crate::config::reset_config();
        let err = external_error("payments-api", Some(503), "upstream unavailable");
        assert_eq!(err.error_type(), "ExternalError");
        let json = err.context().map(crate::context::canonical_json_string).unwrap();
        assert!(json.contains("\"service\":\"payments-api\""));
    }
}
