//! Operation-to-tool conversion and bounded schema translation

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::protocol::{Tool, ToolAnnotations};
use crate::{Error, Result};

use super::document::{Document, Operation, ParameterLocation};

/// Maximum schema recursion depth. Self-referential schemas (a `Category`
/// whose `subcategories` is `array<Category>`) would otherwise never
/// terminate; at the limit an opaque `object` is emitted instead.
pub const MAX_SCHEMA_DEPTH: usize = 10;

/// Property name non-object request bodies are wrapped under.
const REQUEST_BODY_PROPERTY: &str = "request_body";
/// Property name non-object response bodies are wrapped under.
const RESPONSE_BODY_PROPERTY: &str = "response_body";

/// A converted tool plus the binding details its handler needs.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    /// Wire descriptor (without a bound handler)
    pub tool: Tool,
    /// Which input properties travel as query/path/header parameters;
    /// everything else belongs to the request body
    pub parameter_locations: HashMap<String, ParameterLocation>,
    /// The request body was non-object and wrapped under `request_body`
    pub wrapped_body: bool,
}

/// Produce a tool descriptor for one extracted operation.
pub fn convert_operation(op: &Operation, doc: &Document, service_id: &str) -> Result<ToolDescriptor> {
    let name = sanitize_tool_name(&op.id());
    let title = op
        .summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| op.operation_id.clone())
        .unwrap_or_else(|| format!("{} {}", op.method, op.path));

    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();
    let mut parameter_locations = HashMap::new();
    let mut wrapped_body = false;

    if let Some(body_schema) = op.primary_request_schema() {
        let converted = convert_schema(REQUEST_BODY_PROPERTY, body_schema, doc, 0)?;
        if converted.get("type").and_then(Value::as_str) == Some("object") {
            if let Some(props) = converted.get("properties").and_then(Value::as_object) {
                for (key, value) in props {
                    properties.insert(key.clone(), value.clone());
                }
            }
            if let Some(body_required) = converted.get("required").and_then(Value::as_array) {
                for entry in body_required {
                    if let Some(s) = entry.as_str() {
                        push_unique(&mut required, s);
                    }
                }
            }
        } else {
            properties.insert(REQUEST_BODY_PROPERTY.to_string(), converted);
            wrapped_body = true;
            if op.request_body_required {
                push_unique(&mut required, REQUEST_BODY_PROPERTY);
            }
        }
    }

    for param in &op.parameters {
        if param.location == ParameterLocation::Cookie {
            continue;
        }
        let schema = param.schema.clone().unwrap_or_else(|| json!({"type": "string"}));
        let mut converted = convert_schema(&param.name, &schema, doc, 0)?;
        if let (Some(desc), Some(obj)) = (&param.description, converted.as_object_mut()) {
            obj.entry("description".to_string())
                .or_insert_with(|| Value::String(desc.clone()));
        }
        properties.insert(param.name.clone(), converted);
        parameter_locations.insert(param.name.clone(), param.location);
        if param.required {
            push_unique(&mut required, &param.name);
        }
    }

    let mut input_schema = Map::new();
    input_schema.insert("type".to_string(), json!("object"));
    input_schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        input_schema.insert("required".to_string(), json!(required));
    }

    let output_schema = match op.success_response_schema() {
        Some(schema) => {
            let converted = convert_schema(RESPONSE_BODY_PROPERTY, schema, doc, 0)?;
            if converted.get("type").and_then(Value::as_str) == Some("object") {
                Some(converted)
            } else {
                Some(json!({
                    "type": "object",
                    "properties": { RESPONSE_BODY_PROPERTY: converted }
                }))
            }
        }
        None => None,
    };

    let idempotent = matches!(op.method.as_str(), "GET" | "HEAD" | "OPTIONS" | "TRACE" | "PUT" | "DELETE");

    let tool = Tool {
        name,
        service_id: service_id.to_string(),
        title: Some(title),
        description: op.description.clone().or_else(|| op.summary.clone()),
        input_schema: Value::Object(input_schema),
        output_schema,
        annotations: Some(ToolAnnotations {
            read_only_hint: Some(op.method == "GET"),
            idempotent_hint: Some(idempotent),
            open_world_hint: Some(true),
        }),
        // discovered operations carry no cache declaration
        cache_ttl_secs: None,
        underlying_method_fqn: Some(format!("{} {}", op.method, op.path)),
    };

    Ok(ToolDescriptor { tool, parameter_locations, wrapped_body })
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Sanitize an operation id into a tool name: runs of characters outside
/// `[A-Za-z0-9_]` are replaced by `_<hash>_` where the hash is a short
/// stable digest of the run, so distinct originals stay distinct.
#[must_use]
pub fn sanitize_tool_name(raw: &str) -> String {
    let mut out = String::new();
    let mut run = String::new();
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if !run.is_empty() {
                out.push_str(&run_marker(&run));
                run.clear();
            }
            out.push(c);
        } else {
            run.push(c);
        }
    }
    if !run.is_empty() {
        out.push_str(&run_marker(&run));
    }
    if out.is_empty() { "unnamed_operation".to_string() } else { out }
}

fn run_marker(run: &str) -> String {
    let digest = Sha256::digest(run.as_bytes());
    format!("_{}_", &hex::encode(digest)[..6])
}

/// Convert one OpenAPI schema into a JSON-Schema fragment.
///
/// Resolves `#/components/schemas/*` references, merges `allOf` branches
/// depth-first (later branches overriding earlier ones), and recurses into
/// object properties and array items with a depth counter. A depth counter
/// rather than a visited set: identical subschemas at different depths are
/// still expanded independently up to the cap.
pub fn convert_schema(name: &str, schema: &Value, doc: &Document, depth: usize) -> Result<Value> {
    if depth >= MAX_SCHEMA_DEPTH {
        return Ok(json!({"type": "object"}));
    }

    let schema = resolve_ref(name, schema, doc)?;
    let declared = declared_type(schema);
    let ty = match declared {
        Some(ty) => ty,
        None if schema.get("allOf").is_some() => "object".to_string(),
        None => {
            warn!(schema = %name, "Schema declares no type, defaulting to string");
            "string".to_string()
        }
    };

    match ty.as_str() {
        "object" => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("object"));
            copy_field(schema, &mut out, "description");

            let merged = merge_schema_properties(name, schema, doc)?;
            if !merged.is_empty() {
                let mut converted = Map::new();
                for (key, value) in merged {
                    converted.insert(key.clone(), convert_schema(&key, &value, doc, depth + 1)?);
                }
                out.insert("properties".to_string(), Value::Object(converted));
            }

            let required = merged_required(name, schema, doc)?;
            if !required.is_empty() {
                out.insert("required".to_string(), json!(required));
            }
            Ok(Value::Object(out))
        }
        "array" => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!("array"));
            copy_field(schema, &mut out, "description");
            if let Some(items) = schema.get("items") {
                out.insert("items".to_string(), convert_schema(name, items, doc, depth + 1)?);
            }
            Ok(Value::Object(out))
        }
        primitive => {
            let mut out = Map::new();
            out.insert("type".to_string(), json!(primitive));
            for field in ["format", "enum", "default", "description"] {
                copy_field(schema, &mut out, field);
            }
            Ok(Value::Object(out))
        }
    }
}

fn copy_field(from: &Value, to: &mut Map<String, Value>, field: &str) {
    if let Some(value) = from.get(field) {
        to.insert(field.to_string(), value.clone());
    }
}

/// `type` may be a string or (OpenAPI 3.1) an array; the first entry wins.
fn declared_type(schema: &Value) -> Option<String> {
    match schema.get("type") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(entries)) => {
            entries.iter().find_map(Value::as_str).map(ToString::to_string)
        }
        _ => None,
    }
}

/// Follow `$ref` chains to a concrete schema. Only local
/// `#/components/schemas/*` references are supported; a reference cycle or
/// an unknown target is an error naming the offending reference.
fn resolve_ref<'a>(name: &str, schema: &'a Value, doc: &'a Document) -> Result<&'a Value> {
    let mut current = schema;
    let mut visited: Vec<&str> = Vec::new();
    while let Some(reference) = current.get("$ref").and_then(Value::as_str) {
        let target = reference.strip_prefix("#/components/schemas/").ok_or_else(|| {
            Error::OpenApi(format!("schema \"{name}\": unsupported reference \"{reference}\""))
        })?;
        if visited.contains(&target) {
            return Err(Error::OpenApi(format!(
                "schema \"{name}\": reference cycle through \"{reference}\""
            )));
        }
        visited.push(target);
        current = doc.component_schema(target).ok_or_else(|| {
            Error::OpenApi(format!("schema \"{name}\": unresolvable reference \"{reference}\""))
        })?;
    }
    Ok(current)
}

/// Walk `allOf` depth-first, shallow-merging properties with later branches
/// overriding earlier ones, then overlay the schema's own properties.
fn merge_schema_properties(
    name: &str,
    schema: &Value,
    doc: &Document,
) -> Result<Map<String, Value>> {
    let mut merged = Map::new();
    if let Some(branches) = schema.get("allOf").and_then(Value::as_array) {
        for branch in branches {
            let branch = resolve_ref(name, branch, doc)?;
            for (key, value) in merge_schema_properties(name, branch, doc)? {
                merged.insert(key, value);
            }
        }
    }
    if let Some(own) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in own {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}

fn merged_required(name: &str, schema: &Value, doc: &Document) -> Result<Vec<String>> {
    let mut required: Vec<String> = Vec::new();
    if let Some(branches) = schema.get("allOf").and_then(Value::as_array) {
        for branch in branches {
            let branch = resolve_ref(name, branch, doc)?;
            for entry in merged_required(name, branch, doc)? {
                push_unique(&mut required, &entry);
            }
        }
    }
    if let Some(own) = schema.get("required").and_then(Value::as_array) {
        for entry in own.iter().filter_map(Value::as_str) {
            push_unique(&mut required, entry);
        }
    }
    Ok(required)
}
