//! Request and tool-schema validation for the generativelanguage API.
//!
//! Google rejects a class of documents the other dialects accept: empty
//! `contents`, parts with no payload, object schemas with no properties,
//! `anyOf` that can only be null. Catching these before the wire turns an
//! opaque upstream 400 into a [`TransLLMError::Validation`] with paths.

use serde_json::Value;

use crate::error::{Result, TransLLMError};

/// Recursion ceiling for schema validation; also the cycle guard, since a
/// document this deep is either adversarial or a serialisation bug.
pub(crate) const MAX_SCHEMA_DEPTH: usize = 50;

/// Validates a complete request document (either direction of travel).
pub(crate) fn validate_request(doc: &Value) -> Result<()> {
    let mut errors = Vec::new();

    match doc.get("contents") {
        None => errors.push("contents: missing".to_string()),
        Some(Value::Array(contents)) if contents.is_empty() => {
            errors.push("contents: must be a non-empty list".to_string());
        }
        Some(Value::Array(contents)) => {
            for (content_index, content) in contents.iter().enumerate() {
                validate_content(content, content_index, &mut errors);
            }
        }
        Some(_) => errors.push("contents: must be a list".to_string()),
    }

    if let Some(Value::Array(tools)) = doc.get("tools") {
        for (tool_index, tool) in tools.iter().enumerate() {
            let declarations = tool
                .get("functionDeclarations")
                .or_else(|| tool.get("function_declarations"));
            let Some(Value::Array(declarations)) = declarations else {
                continue;
            };
            for declaration in declarations {
                if let Some(parameters) = declaration.get("parameters") {
                    validate_schema(
                        parameters,
                        &format!("tools[{tool_index}].parameters"),
                        0,
                        &mut errors,
                    );
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TransLLMError::Validation { errors })
    }
}

fn validate_content(content: &Value, content_index: usize, errors: &mut Vec<String>) {
    let path = format!("contents[{content_index}]");
    match content.get("parts") {
        None => errors.push(format!("{path}.parts: missing")),
        Some(Value::Array(parts)) if parts.is_empty() => {
            errors.push(format!("{path}.parts: must be a non-empty list"));
        }
        Some(Value::Array(parts)) => {
            for (part_index, part) in parts.iter().enumerate() {
                if !has_part_payload(part) {
                    errors.push(format!(
                        "{path}.parts[{part_index}]: must have at least one of: \
                         text, inline_data, file_data, function_call, function_response"
                    ));
                }
            }
        }
        Some(_) => errors.push(format!("{path}.parts: must be a list")),
    }
}

fn has_part_payload(part: &Value) -> bool {
    const PAYLOAD_KEYS: [&str; 10] = [
        "text",
        "inlineData",
        "inline_data",
        "fileData",
        "file_data",
        "functionCall",
        "function_call",
        "functionResponse",
        "function_response",
        "executableCode",
    ];
    PAYLOAD_KEYS.iter().any(|key| part.get(key).is_some())
}

/// Validates one JSON Schema, collecting path-tagged problems.
pub(crate) fn validate_schema(schema: &Value, path: &str, depth: usize, errors: &mut Vec<String>) {
    if depth > MAX_SCHEMA_DEPTH {
        errors.push(format!("{path}: maximum schema depth ({MAX_SCHEMA_DEPTH}) exceeded"));
        return;
    }

    let Some(object) = schema.as_object() else {
        return;
    };

    match object.get("type").and_then(Value::as_str) {
        Some("object") => match object.get("properties") {
            None => errors.push(format!("{path}: object schema has no properties")),
            Some(Value::Object(properties)) if properties.is_empty() => {
                errors.push(format!("{path}: object schema has empty properties"));
            }
            Some(Value::Object(properties)) => {
                for (name, property) in properties {
                    let property_path = format!("{path}.properties.{name}");
                    if property.is_null() || property.as_object().is_some_and(serde_json::Map::is_empty) {
                        errors.push(format!("{property_path}: empty schema"));
                        continue;
                    }
                    if let Some(Value::Array(required)) = property.get("required")
                        && required.is_empty()
                    {
                        errors.push(format!("{property_path}.required: empty list"));
                    }
                    validate_schema(property, &property_path, depth + 1, errors);
                }
            }
            Some(_) => errors.push(format!("{path}.properties: must be an object")),
        },
        Some("array") => {
            if let Some(items) = object.get("items") {
                validate_schema(items, &format!("{path}.items"), depth + 1, errors);
            }
        }
        _ => {}
    }

    if let Some(Value::Array(any_of)) = object.get("anyOf") {
        if any_of.is_empty() {
            errors.push(format!("{path}.anyOf: must not be empty"));
        } else if any_of.len() == 1
            && any_of[0].get("type").and_then(Value::as_str) == Some("null")
        {
            errors.push(format!("{path}.anyOf: must not contain only the null type"));
        } else {
            for (index, branch) in any_of.iter().enumerate() {
                validate_schema(branch, &format!("{path}.anyOf[{index}]"), depth + 1, errors);
            }
        }
    }

    if let Some(Value::Array(all_of)) = object.get("allOf") {
        if all_of.is_empty() {
            errors.push(format!("{path}.allOf: must not be empty"));
        } else {
            for (index, branch) in all_of.iter().enumerate() {
                validate_schema(branch, &format!("{path}.allOf[{index}]"), depth + 1, errors);
            }
        }
    }
}

/// Normalises a schema for the wire: strips JSON-Schema fields the API
/// rejects and defaults missing array `items` to an object schema.
pub(crate) fn normalize_schema(mut schema: Value) -> Value {
    normalize_in_place(&mut schema, 0);
    schema
}

fn normalize_in_place(schema: &mut Value, depth: usize) {
    if depth > MAX_SCHEMA_DEPTH {
        return;
    }
    let Some(object) = schema.as_object_mut() else {
        return;
    };

    object.remove("additionalProperties");
    object.remove("$schema");
    object.remove("default");

    if object.get("type").and_then(Value::as_str) == Some("string")
        && let Some(format) = object.get("format").and_then(Value::as_str)
        && format != "enum"
        && format != "date-time"
    {
        object.remove("format");
    }

    if object.get("type").and_then(Value::as_str) == Some("array") && object.get("items").is_none() {
        object.insert("items".to_string(), serde_json::json!({"type": "object"}));
    }

    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, property) in properties.iter_mut() {
            normalize_in_place(property, depth + 1);
        }
    }
    if let Some(items) = object.get_mut("items") {
        normalize_in_place(items, depth + 1);
    }
    for key in ["anyOf", "allOf"] {
        if let Some(Value::Array(branches)) = object.get_mut(key) {
            for branch in branches {
                normalize_in_place(branch, depth + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_properties_reports_the_tool_path() {
        let doc = json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "tools": [{"functionDeclarations": [{
                "name": "broken",
                "parameters": {"type": "object", "properties": {}}
            }]}]
        });

        let err = validate_request(&doc).unwrap_err();
        let TransLLMError::Validation { errors } = err else {
            unreachable!("expected Validation, got {err:?}");
        };
        assert_eq!(errors.len(), 1);
        assert!(
            errors[0].starts_with("tools[0].parameters"),
            "unexpected path: {}",
            errors[0]
        );
    }

    #[test]
    fn empty_contents_and_empty_parts_are_rejected() {
        let empty_contents = json!({"contents": []});
        assert!(validate_request(&empty_contents).is_err());

        let empty_parts = json!({"contents": [{"role": "user", "parts": []}]});
        assert!(validate_request(&empty_parts).is_err());

        let bare_part = json!({"contents": [{"role": "user", "parts": [{"thought": true}]}]});
        assert!(validate_request(&bare_part).is_err());
    }

    #[test]
    fn any_of_must_offer_a_non_null_branch() {
        let mut errors = Vec::new();
        validate_schema(&json!({"anyOf": []}), "$", 0, &mut errors);
        validate_schema(&json!({"anyOf": [{"type": "null"}]}), "$", 0, &mut errors);
        validate_schema(&json!({"allOf": []}), "$", 0, &mut errors);
        assert_eq!(errors.len(), 3);

        let mut ok = Vec::new();
        validate_schema(
            &json!({"anyOf": [{"type": "null"}, {"type": "string"}]}),
            "$",
            0,
            &mut ok,
        );
        assert!(ok.is_empty());
    }

    #[test]
    fn depth_ceiling_stops_runaway_schemas() {
        let mut schema = json!({"type": "string"});
        for _ in 0..60 {
            schema = json!({"type": "array", "items": schema});
        }

        let mut errors = Vec::new();
        validate_schema(&schema, "$", 0, &mut errors);
        assert!(errors.iter().any(|error| error.contains("maximum schema depth")));
    }

    #[test]
    fn normalize_defaults_array_items_and_strips_rejected_fields() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "tags": {"type": "array"},
                "name": {"type": "string", "format": "hostname", "default": "x"}
            }
        });

        let normalized = normalize_schema(schema);
        assert!(normalized.get("$schema").is_none());
        assert!(normalized.get("additionalProperties").is_none());
        assert_eq!(normalized["properties"]["tags"]["items"], json!({"type": "object"}));
        assert!(normalized["properties"]["name"].get("format").is_none());
        assert!(normalized["properties"]["name"].get("default").is_none());
    }
}
