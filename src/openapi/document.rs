//! Simplified OpenAPI 3 document model
//!
//! Deserializes just the structure the translator needs; schemas stay as
//! raw `serde_json::Value` for later `$ref` resolution.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// HTTP methods recognized inside a path item.
const METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Parsed OpenAPI document
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    /// `openapi` version field; must be 3.x
    pub openapi: Option<String>,
    /// Document info block
    pub info: Info,
    /// Server list; only the first entry is used as a base URL
    #[serde(default)]
    pub servers: Vec<Server>,
    /// Path items, method map deferred as raw values
    #[serde(default)]
    pub paths: HashMap<String, HashMap<String, Value>>,
    /// Reusable components
    #[serde(default)]
    pub components: Option<Components>,
}

/// Info block
#[derive(Debug, Clone, Deserialize)]
pub struct Info {
    /// API title
    pub title: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// API description
    #[serde(default)]
    pub description: Option<String>,
}

/// Server entry
#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    /// Base URL
    pub url: String,
}

/// Components block
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Components {
    /// Named schemas addressable as `#/components/schemas/<name>`
    #[serde(default)]
    pub schemas: HashMap<String, Value>,
}

impl Document {
    /// Look up a named component schema.
    #[must_use]
    pub fn component_schema(&self, name: &str) -> Option<&Value> {
        self.components.as_ref().and_then(|c| c.schemas.get(name))
    }

    /// The base URL declared by the document, when any.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.servers.first().map(|s| s.url.as_str())
    }
}

/// Operation object as deserialized from a path item
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationObject {
    #[serde(default)]
    operation_id: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<ParameterObject>,
    #[serde(default)]
    request_body: Option<RequestBody>,
    #[serde(default)]
    responses: HashMap<String, ResponseObject>,
}

/// Operation parameter
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterObject {
    /// Parameter name
    pub name: String,
    /// Where the parameter travels
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    /// Whether the parameter must be supplied
    #[serde(default)]
    pub required: bool,
    /// Parameter description
    #[serde(default)]
    pub description: Option<String>,
    /// Parameter schema, raw
    #[serde(default)]
    pub schema: Option<Value>,
}

/// Parameter location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    /// Query string
    Query,
    /// Path template
    Path,
    /// HTTP header
    Header,
    /// Cookie (excluded from generated schemas)
    Cookie,
}

#[derive(Debug, Clone, Deserialize)]
struct RequestBody {
    #[serde(default)]
    required: bool,
    #[serde(default)]
    content: HashMap<String, MediaType>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaType {
    #[serde(default)]
    schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseObject {
    #[serde(default)]
    content: Option<HashMap<String, MediaType>>,
}

/// One extracted path + method pair
#[derive(Debug, Clone)]
pub struct Operation {
    /// Operation id as declared by the document
    pub operation_id: Option<String>,
    /// Summary line
    pub summary: Option<String>,
    /// Long description
    pub description: Option<String>,
    /// Uppercase HTTP method
    pub method: String,
    /// Path template, verbatim
    pub path: String,
    /// Whether the request body is required
    pub request_body_required: bool,
    /// Request-body schemas by content type
    pub request_bodies: HashMap<String, Value>,
    /// Response schemas by status then content type
    pub responses: HashMap<String, HashMap<String, Value>>,
    /// Declared parameters (query/path/header/cookie)
    pub parameters: Vec<ParameterObject>,
}

impl Operation {
    /// The effective operation id: declared id, or `METHOD_path` fallback.
    #[must_use]
    pub fn id(&self) -> String {
        self.operation_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.method, self.path))
    }

    /// The request-body schema the translator works from: JSON when
    /// declared, otherwise the first declared content type.
    #[must_use]
    pub fn primary_request_schema(&self) -> Option<&Value> {
        self.request_bodies
            .get("application/json")
            .or_else(|| self.request_bodies.values().next())
    }

    /// The success-response JSON schema (status 200, then 201).
    #[must_use]
    pub fn success_response_schema(&self) -> Option<&Value> {
        ["200", "201"]
            .iter()
            .find_map(|status| self.responses.get(*status))
            .and_then(|by_type| {
                by_type.get("application/json").or_else(|| by_type.values().next())
            })
    }
}

/// Parse and validate an OpenAPI 3 document, returning the extracted
/// operations and the parsed document for later `$ref` resolution.
///
/// YAML is tried first, then JSON, matching how specs circulate in the
/// wild.
pub fn parse_document(content: &[u8]) -> Result<(Vec<Operation>, Document)> {
    let text = std::str::from_utf8(content)
        .map_err(|_| Error::OpenApi("spec content is not valid UTF-8".to_string()))?;

    let doc: Document = serde_yaml::from_str(text)
        .or_else(|_| serde_json::from_str(text))
        .map_err(|e: serde_json::Error| {
            Error::OpenApi(format!("failed to parse OpenAPI spec: {e}"))
        })?;

    match doc.openapi.as_deref() {
        Some(version) if version.starts_with('3') => {}
        Some(version) => {
            return Err(Error::OpenApi(format!(
                "unsupported OpenAPI version \"{version}\", expected 3.x"
            )));
        }
        None => {
            return Err(Error::OpenApi("document is missing the openapi version field".to_string()));
        }
    }

    let mut operations = Vec::new();
    for (path, item) in &doc.paths {
        for method in METHODS {
            let Some(raw) = item.get(*method) else { continue };
            let op: OperationObject = serde_json::from_value(raw.clone()).map_err(|e| {
                Error::OpenApi(format!("invalid operation {method} {path}: {e}"))
            })?;
            operations.push(extract(path, method, op));
        }
    }
    // deterministic order regardless of map iteration
    operations.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.method.cmp(&b.method)));

    Ok((operations, doc))
}

fn extract(path: &str, method: &str, op: OperationObject) -> Operation {
    let method_upper = method.to_uppercase();
    let operation_id = op.operation_id.clone().filter(|id| !id.is_empty());

    let request_bodies = op
        .request_body
        .as_ref()
        .map(|body| {
            body.content
                .iter()
                .filter_map(|(ct, media)| media.schema.clone().map(|s| (ct.clone(), s)))
                .collect()
        })
        .unwrap_or_default();

    let responses = op
        .responses
        .iter()
        .map(|(status, response)| {
            let by_type = response
                .content
                .as_ref()
                .map(|content| {
                    content
                        .iter()
                        .filter_map(|(ct, media)| media.schema.clone().map(|s| (ct.clone(), s)))
                        .collect()
                })
                .unwrap_or_default();
            (status.clone(), by_type)
        })
        .collect();

    Operation {
        operation_id,
        summary: op.summary,
        description: op.description,
        method: method_upper,
        path: path.to_string(),
        request_body_required: op.request_body.as_ref().is_some_and(|b| b.required),
        request_bodies,
        responses,
        parameters: op.parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PETSTORE: &str = r##"
openapi: "3.0.3"
info:
  title: Petstore
  version: "1.0"
servers:
  - url: https://petstore.example.com/v1
paths:
  /pets:
    get:
      operationId: listPets
      summary: List pets
      parameters:
        - name: limit
          in: query
          required: false
          schema:
            type: integer
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items:
                  $ref: "#/components/schemas/Pet"
    post:
      operationId: createPet
      requestBody:
        required: true
        content:
          application/json:
            schema:
              $ref: "#/components/schemas/Pet"
      responses:
        "201":
          description: created
components:
  schemas:
    Pet:
      type: object
      properties:
        name:
          type: string
"##;

    #[test]
    fn parses_yaml_document() {
        let (operations, doc) = parse_document(PETSTORE.as_bytes()).unwrap();
        assert_eq!(operations.len(), 2);
        assert_eq!(doc.base_url(), Some("https://petstore.example.com/v1"));
        assert!(doc.component_schema("Pet").is_some());

        let list = operations.iter().find(|o| o.id() == "listPets").unwrap();
        assert_eq!(list.method, "GET");
        assert_eq!(list.path, "/pets");
        assert!(list.success_response_schema().is_some());
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{"openapi":"3.1.0","info":{"title":"t","version":"1"},"paths":{}}"#;
        let (operations, _) = parse_document(json.as_bytes()).unwrap();
        assert!(operations.is_empty());
    }

    #[test]
    fn missing_version_field_is_rejected() {
        let json = r#"{"info":{"title":"t","version":"1"},"paths":{}}"#;
        let err = parse_document(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("missing the openapi version"));
    }

    #[test]
    fn swagger_2_is_rejected() {
        let json = r#"{"openapi":"2.0","info":{"title":"t","version":"1"},"paths":{}}"#;
        let err = parse_document(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unsupported OpenAPI version"));
    }

    #[test]
    fn operation_id_fallback_uses_method_and_path() {
        let json = r#"{"openapi":"3.0.0","info":{"title":"t","version":"1"},
            "paths":{"/things":{"get":{"responses":{}}}}}"#;
        let (operations, _) = parse_document(json.as_bytes()).unwrap();
        assert_eq!(operations[0].id(), "GET_/things");
    }

    #[test]
    fn path_level_keys_are_ignored() {
        let json = r#"{"openapi":"3.0.0","info":{"title":"t","version":"1"},
            "paths":{"/things":{"summary":"not a method","get":{"responses":{}}}}}"#;
        let (operations, _) = parse_document(json.as_bytes()).unwrap();
        assert_eq!(operations.len(), 1);
    }
}
