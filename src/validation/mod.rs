//! JSON-Schema validation for request bodies and stored model documents

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{4}-?[0-9a-fA-F]{12}$")
        .expect("valid uuid regex")
});
static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-a-z0-9]+$").expect("valid slug regex"));
static FUNCTION_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_.]+$").expect("valid function name regex"));

pub fn is_uuid(value: &str) -> bool {
    UUID_RE.is_match(value)
}

pub fn is_slug(value: &str) -> bool {
    SLUG_RE.is_match(value)
}

pub fn is_function_name(value: &str) -> bool {
    FUNCTION_NAME_RE.is_match(value)
}

#[derive(Debug, Error)]
pub enum ValidationError {
    /// Request body rejected by the resource schema
    #[error("options failed validation: {0}")]
    Request(String),

    /// Schema document itself could not be compiled
    #[error("schema is invalid: {0}")]
    InvalidSchema(String),

    /// Model-level rule failed; the message is returned verbatim
    #[error("{0}")]
    Model(String),
}

/// Validate a request body against a resource schema with the `uuid`, `slug` and
/// `function_name` format checkers enabled
pub fn validate_request(schema: &Value, body: &Value) -> Result<(), ValidationError> {
    let validator = jsonschema::options()
        .with_format("uuid", is_uuid)
        .with_format("slug", is_slug)
        .with_format("function_name", is_function_name)
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| ValidationError::InvalidSchema(e.to_string()))?;

    validator
        .validate(body)
        .map_err(|e| ValidationError::Request(e.to_string()))
}

/// Validate `instance` against a stored schema; the error carries the first failure message
pub fn validate_against(schema: &Value, instance: &Value) -> Result<(), String> {
    let schema = normalise_schema(schema).map_err(|e| e.to_string())?;
    let validator = jsonschema::options()
        .build(&schema)
        .map_err(|e| format!("schema is invalid: {}", e))?;
    validator.validate(instance).map_err(|e| e.to_string())
}

/// Check that `schema` is itself a valid JSON-Schema document
pub fn check_schema(schema: &Value) -> Result<(), ValidationError> {
    let schema = normalise_schema(schema)?;
    match jsonschema::meta::try_validate(&schema) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ValidationError::InvalidSchema(e.to_string())),
        Err(e) => return Err(ValidationError::InvalidSchema(e.to_string())),
    }
    jsonschema::options()
        .build(&schema)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidSchema(e.to_string()))
}

const SUPPORTED_DRAFTS: [&str; 5] = ["draft-04", "draft-06", "draft-07", "draft/2019-09", "draft/2020-12"];
const LEGACY_DRAFT: &str = "http://json-schema.org/draft-04/schema#";

/// Stored schemas are draft 3 unless `$schema` names a later draft.
///
/// `$schema` must be a string when present. Any other URI (or free text) marks a
/// legacy document, which is rewritten into its draft 4 equivalent.
pub fn normalise_schema(schema: &Value) -> Result<Value, ValidationError> {
    let mut schema = schema.clone();
    let Some(object) = schema.as_object_mut() else {
        return Ok(schema);
    };

    let legacy = match object.get("$schema") {
        None => true,
        Some(Value::String(uri)) => !SUPPORTED_DRAFTS.iter().any(|draft| uri.contains(draft)),
        Some(other) => {
            return Err(ValidationError::InvalidSchema(format!("{} is not of type 'string'", other)));
        }
    };

    if legacy {
        upgrade_draft3(&mut schema);
        if let Some(object) = schema.as_object_mut() {
            object.insert("$schema".to_string(), Value::String(LEGACY_DRAFT.to_string()));
        }
    }
    Ok(schema)
}

/// Rewrite draft 3 keywords in place: boolean `required` moves to the parent's list,
/// `divisibleBy` becomes `multipleOf` and `"type": "any"` is dropped
fn upgrade_draft3(schema: &mut Value) {
    let Some(object) = schema.as_object_mut() else {
        return;
    };

    if let Some(divisor) = object.remove("divisibleBy") {
        object.insert("multipleOf".to_string(), divisor);
    }
    if object.get("type").and_then(Value::as_str) == Some("any") {
        object.remove("type");
    }
    if object.get("required").is_some_and(Value::is_boolean) {
        object.remove("required");
    }

    let mut required = Vec::new();
    if let Some(Value::Object(properties)) = object.get_mut("properties") {
        for (name, property) in properties.iter_mut() {
            if property.get("required") == Some(&Value::Bool(true)) {
                required.push(Value::String(name.clone()));
            }
            upgrade_draft3(property);
        }
    }
    if !required.is_empty() {
        if let Value::Array(existing) = object.entry("required").or_insert_with(|| Value::Array(Vec::new())) {
            existing.extend(required);
        }
    }

    for keyword in ["patternProperties", "definitions", "dependencies"] {
        if let Some(Value::Object(children)) = object.get_mut(keyword) {
            children.values_mut().for_each(upgrade_draft3);
        }
    }
    for keyword in ["additionalProperties", "additionalItems", "not"] {
        if let Some(child) = object.get_mut(keyword) {
            upgrade_draft3(child);
        }
    }
    for keyword in ["items", "anyOf", "allOf", "oneOf", "extends"] {
        match object.get_mut(keyword) {
            Some(Value::Array(children)) => children.iter_mut().for_each(upgrade_draft3),
            Some(child) => upgrade_draft3(child),
            None => {}
        }
    }
    if let Some(extends) = object.remove("extends") {
        let parents = match extends {
            Value::Array(parents) => parents,
            parent => vec![parent],
        };
        let all_of = object.entry("allOf").or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(all_of) = all_of {
            all_of.extend(parents);
        }
    }
}

/// Query parameters accepted by modules and transforms
pub static QUERY_PARAM_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "period": {
                "type": "string",
                "enum": ["hour", "day", "week", "month", "quarter"]
            },
            "start_at": { "type": "string" },
            "end_at": { "type": "string" },
            "duration": { "type": "integer" },
            "sort_by": { "type": "string" },
            "group_by": {
                "oneOf": [
                    { "type": "string" },
                    { "type": "array", "items": { "type": "string" } }
                ]
            },
            "collect": {
                "type": "array",
                "items": { "type": "string", "pattern": ":(sum|mean|set|count)$" }
            },
            "filter_by": {
                "type": "array",
                "items": { "type": "string" }
            }
        }
    })
});

/// Shape every record written to a data set must have
pub static TIMESTAMP_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-04/schema#",
        "title": "Timestamps",
        "type": "object",
        "properties": {
            "_timestamp": {
                "description": "An ISO8601 formatted date time",
                "type": "string",
                "format": "date-time"
            }
        },
        "required": ["_timestamp"]
    })
});

/// Wrap a scalar `group_by` in a one-element list; returns whether anything changed
pub fn listify_group_by(query_parameters: &mut Value) -> bool {
    let Some(params) = query_parameters.as_object_mut() else {
        return false;
    };
    match params.get_mut("group_by") {
        Some(group_by) if !group_by.is_array() && !group_by.is_null() && group_by.as_str() != Some("") => {
            let scalar = group_by.take();
            *group_by = Value::Array(vec![scalar]);
            true
        }
        _ => false,
    }
}

/// Collects `field: message` pairs raised while validating a model
#[derive(Debug, Default)]
pub struct FieldErrors {
    errors: BTreeMap<String, String>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let message = message.into();
        self.errors
            .entry(field.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&message);
            })
            .or_insert_with(|| message.clone());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `field: message, field: message`
    pub fn message(&self) -> String {
        self.errors
            .iter()
            .map(|(field, msg)| format!("{}: {}", field, msg))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_checkers() {
        assert!(is_uuid("7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f"));
        assert!(is_uuid("7c5d3a1e8a3b4f2e9d5c1b2a3c4d5e6f"));
        assert!(!is_uuid("not-a-uuid"));
        assert!(is_slug("carers-allowance-2"));
        assert!(!is_slug("Carers_Allowance"));
        assert!(is_function_name("backdrop.transformers.tasks.rate"));
        assert!(!is_function_name("Rate()"));
    }

    #[test]
    fn request_validation_enforces_custom_formats() {
        let schema = json!({
            "type": "object",
            "properties": {
                "type_id": { "type": "string", "format": "uuid" },
                "slug": { "type": "string", "format": "slug" }
            },
            "required": ["type_id"],
            "additionalProperties": false
        });
        let ok = json!({ "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f", "slug": "abc" });
        assert!(validate_request(&schema, &ok).is_ok());

        let bad_uuid = json!({ "type_id": "nope" });
        let err = validate_request(&schema, &bad_uuid).unwrap_err();
        assert!(err.to_string().starts_with("options failed validation: "));

        let extra = json!({ "type_id": "7c5d3a1e-8a3b-4f2e-9d5c-1b2a3c4d5e6f", "other": 1 });
        assert!(validate_request(&schema, &extra).is_err());

        let missing = json!({});
        assert!(validate_request(&schema, &missing).is_err());
    }

    #[test]
    fn query_parameters_schema() {
        assert!(validate_against(&QUERY_PARAM_SCHEMA, &json!({ "period": "week", "collect": ["count:sum"] })).is_ok());
        assert!(validate_against(&QUERY_PARAM_SCHEMA, &json!({ "period": "fortnight" })).is_err());
        assert!(validate_against(&QUERY_PARAM_SCHEMA, &json!({ "collect": ["count"] })).is_err());
        assert!(validate_against(&QUERY_PARAM_SCHEMA, &json!({ "duration": "12" })).is_err());
    }

    #[test]
    fn check_schema_rejects_bad_documents() {
        assert!(check_schema(&json!({ "type": "object" })).is_ok());
        let err = check_schema(&json!({ "type": 12 })).unwrap_err();
        assert!(err.to_string().starts_with("schema is invalid: "));
    }

    #[test]
    fn stored_schemas_accept_any_schema_uri() {
        assert!(check_schema(&json!({ "$schema": "http://json-schema.org/schema#", "type": "object" })).is_ok());
        assert!(check_schema(&json!({ "$schema": "a schema" })).is_ok());
        assert!(check_schema(&json!({ "$schema": "A Schema", "type": "object" })).is_ok());
        assert!(check_schema(&json!({ "$schema": "http://json-schema.org/draft-07/schema#" })).is_ok());

        let err = check_schema(&json!({ "$schema": false })).unwrap_err();
        assert!(err.to_string().starts_with("schema is invalid: "));
        assert!(validate_against(&json!({ "$schema": false }), &json!({})).is_err());
    }

    #[test]
    fn draft3_required_properties_are_enforced() {
        let rate = json!({
            "$schema": "http://json-schema.org/draft-03/schema#",
            "type": "object",
            "properties": {
                "denominatorMatcher": { "type": "string", "required": true },
                "numeratorMatcher": { "type": "string", "required": true },
                "matchingAttribute": { "type": "string", "required": true },
                "valueAttribute": { "type": "string", "required": true }
            },
            "additionalProperties": false
        });
        assert!(check_schema(&rate).is_ok());
        assert!(validate_against(&rate, &json!({})).is_err());

        let options = json!({
            "denominatorMatcher": "start",
            "numeratorMatcher": "done",
            "matchingAttribute": "stage",
            "valueAttribute": "count:sum"
        });
        assert!(validate_against(&rate, &options).is_ok());
        assert!(validate_against(&rate, &json!({ "denominatorMatcher": "start" })).is_err());
    }

    #[test]
    fn draft3_keywords_are_rewritten() {
        let schema = normalise_schema(&json!({
            "properties": {
                "value": { "type": "any", "required": false },
                "step": { "divisibleBy": 5 }
            },
            "extends": { "type": "object" }
        }))
        .unwrap();
        assert!(schema.get("required").is_none());
        assert!(schema["properties"]["value"].get("type").is_none());
        assert!(schema["properties"]["value"].get("required").is_none());
        assert_eq!(schema["properties"]["step"]["multipleOf"], 5);
        assert_eq!(schema["allOf"], json!([{ "type": "object" }]));
        assert!(validate_against(&schema, &json!({ "step": 7 })).is_err());
    }

    #[test]
    fn group_by_is_listified() {
        let mut q = json!({ "group_by": "channel" });
        assert!(listify_group_by(&mut q));
        assert_eq!(q["group_by"], json!(["channel"]));
        assert!(!listify_group_by(&mut q));

        let mut empty = json!({});
        assert!(!listify_group_by(&mut empty));
    }

    #[test]
    fn field_errors_join_per_field() {
        let mut errors = FieldErrors::new();
        assert!(errors.is_empty());
        errors.add("slug", "too long");
        errors.add("slug", "bad characters");
        errors.add("name", "required");
        assert_eq!(errors.message(), "name: required, slug: too long, bad characters");
    }
}
