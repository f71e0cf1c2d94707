//! Parameter and request-body mapping into a tool's structured input schema.

use crate::refs::{LocalRefs, RefError};
use openapiv3::{Parameter, ParameterSchemaOrContent, ReferenceOr, RequestBody};
use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Where an input field travels in the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
        }
    }
}

/// One operation parameter, with `$ref`s already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDescriptor {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    /// JSON Schema of the value; `None` means "string".
    pub schema: Option<Value>,
    pub description: Option<String>,
}

impl ParamDescriptor {
    /// Build a descriptor from a resolved `OpenAPI` parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter schema references something that cannot be resolved.
    pub fn from_openapi(param: &Parameter, refs: &LocalRefs) -> Result<Self, RefError> {
        let (data, location) = match param {
            Parameter::Path { parameter_data, .. } => (parameter_data, ParamLocation::Path),
            Parameter::Query { parameter_data, .. } => (parameter_data, ParamLocation::Query),
            Parameter::Header { parameter_data, .. } => (parameter_data, ParamLocation::Header),
            Parameter::Cookie { parameter_data, .. } => (parameter_data, ParamLocation::Cookie),
        };

        let schema = match &data.format {
            ParameterSchemaOrContent::Schema(s) => Some(schema_ref_to_json(s, refs)?),
            ParameterSchemaOrContent::Content(content) => content
                .values()
                .find_map(|mt| mt.schema.as_ref())
                .map(|s| schema_ref_to_json(s, refs))
                .transpose()?,
        };

        Ok(Self {
            name: data.name.clone(),
            location,
            required: data.required,
            schema,
            description: data.description.clone(),
        })
    }
}

/// One input field of a tool: a JSON Schema fragment plus its transport location.
///
/// Serialized as the schema with an extra `in` key, which is also how the field is advertised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(flatten)]
    pub schema: Map<String, Value>,
}

impl InputField {
    #[must_use]
    pub fn string(location: ParamLocation) -> Self {
        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("string"));
        Self { location, schema }
    }

    /// The declared JSON type, if any (`"string"` for synthesized fields).
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.schema.get("type").and_then(Value::as_str)
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.schema.get("description").and_then(Value::as_str)
    }
}

/// Structured input schema of a tool.
///
/// `required: None` and `required: Some(vec![])` mean the same thing; use [`Self::is_required`]
/// and [`Self::required_names`] rather than inspecting the field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    pub fields: BTreeMap<String, InputField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    /// Undeclared argument keys are accepted and sent in the body.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub open_body: bool,
}

impl InputSchema {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn location_of(&self, name: &str) -> Option<ParamLocation> {
        self.fields.get(name).map(|f| f.location)
    }

    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required_names().iter().any(|r| r == name)
    }

    #[must_use]
    pub fn required_names(&self) -> &[String] {
        self.required.as_deref().unwrap_or(&[])
    }

    /// Insert or replace a field, keeping the required set consistent.
    pub fn set_field(&mut self, name: &str, field: InputField, required: bool) {
        self.fields.insert(name.to_string(), field);
        let mut names: Vec<String> = self
            .required_names()
            .iter()
            .filter(|r| *r != name)
            .cloned()
            .collect();
        if required {
            names.push(name.to_string());
        }
        self.required = (!names.is_empty()).then_some(names);
    }

    /// JSON Schema advertised to MCP clients as the tool's `inputSchema`.
    #[must_use]
    pub fn to_json_schema(&self) -> JsonObject {
        let mut properties = Map::new();
        for (name, field) in &self.fields {
            let value = serde_json::to_value(field).unwrap_or_else(|_| json!({}));
            properties.insert(name.clone(), value);
        }

        let mut out = JsonObject::new();
        out.insert("type".to_string(), json!("object"));
        out.insert("properties".to_string(), Value::Object(properties));
        let required = self.required_names();
        if !required.is_empty() {
            out.insert("required".to_string(), json!(required));
        }
        out
    }
}

/// Maps parameter descriptors and request bodies into an [`InputSchema`].
pub struct ParameterSchemaMapper<'a> {
    refs: &'a LocalRefs,
}

impl<'a> ParameterSchemaMapper<'a> {
    #[must_use]
    pub fn new(refs: &'a LocalRefs) -> Self {
        Self { refs }
    }

    /// One field per distinct parameter name.
    ///
    /// When a name is declared in several locations the path parameter wins, otherwise the first
    /// declaration wins. Path parameters are always required.
    #[must_use]
    pub fn map(parameters: &[ParamDescriptor]) -> InputSchema {
        let mut fields: BTreeMap<String, InputField> = BTreeMap::new();
        let mut required: Vec<String> = Vec::new();

        for param in parameters {
            if let Some(existing) = fields.get(&param.name)
                && (existing.location == ParamLocation::Path
                    || param.location != ParamLocation::Path)
            {
                continue;
            }

            let mut schema = match &param.schema {
                Some(Value::Object(obj)) => obj.clone(),
                _ => {
                    let mut m = Map::new();
                    m.insert("type".to_string(), json!("string"));
                    m
                }
            };
            if let Some(desc) = &param.description {
                schema.insert("description".to_string(), json!(desc));
            }

            fields.insert(
                param.name.clone(),
                InputField {
                    location: param.location,
                    schema,
                },
            );

            required.retain(|r| r != &param.name);
            if param.required || param.location == ParamLocation::Path {
                required.push(param.name.clone());
            }
        }

        InputSchema {
            fields,
            required: (!required.is_empty()).then_some(required),
            open_body: false,
        }
    }

    /// Map a request body into `(bodySchema, bodyRequired)`.
    ///
    /// Only `application/json` is recognized. An unresolvable body schema is dropped (logged).
    #[must_use]
    pub fn map_request_body(&self, body: Option<&RequestBody>) -> (Option<Value>, bool) {
        match self.try_map_request_body(body) {
            Ok(mapped) => mapped,
            Err(e) => {
                tracing::warn!(error = %e, "dropping request body schema");
                (None, body.is_some_and(|b| b.required))
            }
        }
    }

    /// Like [`Self::map_request_body`], surfacing reference errors to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON body schema cannot be resolved.
    pub fn try_map_request_body(
        &self,
        body: Option<&RequestBody>,
    ) -> Result<(Option<Value>, bool), RefError> {
        let Some(body) = body else {
            return Ok((None, false));
        };

        let schema = body
            .content
            .iter()
            .find(|(media_type, _)| is_json_media_type(media_type))
            .and_then(|(_, mt)| mt.schema.as_ref());

        match schema {
            Some(s) => Ok((Some(schema_ref_to_json(s, self.refs)?), body.required)),
            None => Ok((None, body.required)),
        }
    }
}

fn is_json_media_type(media_type: &str) -> bool {
    media_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

/// Convert an `OpenAPI` schema (or reference) to a self-contained JSON Schema.
pub(crate) fn schema_ref_to_json<T: Serialize>(
    schema: &ReferenceOr<T>,
    refs: &LocalRefs,
) -> Result<Value, RefError> {
    let raw = serde_json::to_value(schema).unwrap_or_else(|_| json!({}));
    refs.inline_schema(&raw)
}
