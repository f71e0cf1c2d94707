//! `OpenAPI` description -> ordered tool catalog.

use crate::auth::AuthorizationConfig;
use crate::error::{CompileWarning, OpenApiToolsError, Result};
use crate::refs::LocalRefs;
use crate::schema::{InputField, InputSchema, ParamDescriptor, ParamLocation, ParameterSchemaMapper};
use anything_http_tools::HttpMethod;
use openapiv3::{OpenAPI, Operation, Parameter, PathItem, ReferenceOr};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid placeholder regex"));
static NON_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("valid name regex"));
static UNDERSCORES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

/// One callable tool, compiled from one `OpenAPI` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub method: HttpMethod,
    pub path: String,
    pub input_schema: InputSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_schema: Option<Value>,
    #[serde(default)]
    pub body_required: bool,
    #[serde(default = "default_true")]
    pub requires_authorization: bool,
}

fn default_true() -> bool {
    true
}

impl ToolDescriptor {
    /// Names of the `{param}` placeholders in the path template, in order.
    pub fn path_placeholders(&self) -> impl Iterator<Item = &str> {
        placeholders(&self.path)
    }

    /// Whether the body schema was flattened into individual `body` fields (object bodies) rather
    /// than exposed as a single `body` argument.
    #[must_use]
    pub fn flattens_body(&self) -> bool {
        self.body_schema.as_ref().is_some_and(is_object_schema)
    }
}

fn is_object_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.get("properties").is_some_and(Value::is_object)
}

/// Serializable catalog artifact interpreted by the server at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub authorization: AuthorizationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
    pub tools: Vec<ToolDescriptor>,
}

impl Catalog {
    /// # Errors
    ///
    /// Returns an error if the document is not a valid catalog.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| OpenApiToolsError::OpenApiSpecReadFile {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&raw)
    }

    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Compilation output: the ordered tools plus everything that was degraded along the way.
#[derive(Debug, Clone, Default)]
pub struct CompileReport {
    pub tools: Vec<ToolDescriptor>,
    pub warnings: Vec<CompileWarning>,
}

/// Compiles every supported operation of a description into a [`ToolDescriptor`].
///
/// Output order is path declaration order, then `GET, POST, PUT, PATCH, DELETE`. Names that
/// collide (with each other or with reserved names) get `_1`, `_2`, ... suffixes in that order.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalogCompiler {
    reserved_names: Vec<String>,
}

impl ToolCatalogCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names already taken by built-in tools.
    #[must_use]
    pub fn with_reserved_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved_names.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn compile(&self, spec: &OpenAPI) -> CompileReport {
        let refs = LocalRefs::new(spec);
        let mut report = CompileReport::default();
        let mut taken: HashSet<String> = self.reserved_names.iter().cloned().collect();

        for (path, item) in &spec.paths.paths {
            let item: PathItem = match refs.resolve(item) {
                Ok(item) => item,
                Err(e) => {
                    report
                        .warnings
                        .push(CompileWarning::new(path.as_str(), format!("skipping path: {e}")));
                    continue;
                }
            };

            for method in HttpMethod::COMPILE_ORDER {
                let Some(operation) = operation_for(&item, method) else {
                    continue;
                };
                let tool = compile_operation(
                    &refs,
                    spec,
                    OperationInput {
                        path,
                        method,
                        path_item: &item,
                        operation,
                    },
                    &mut taken,
                    &mut report.warnings,
                );
                report.tools.push(tool);
            }
        }

        for w in &report.warnings {
            tracing::warn!(operation = %w.operation, warning = %w.message, "compile warning");
        }
        report
    }
}

struct OperationInput<'a> {
    path: &'a str,
    method: HttpMethod,
    path_item: &'a PathItem,
    operation: &'a Operation,
}

fn operation_for(item: &PathItem, method: HttpMethod) -> Option<&Operation> {
    match method {
        HttpMethod::Get => item.get.as_ref(),
        HttpMethod::Post => item.post.as_ref(),
        HttpMethod::Put => item.put.as_ref(),
        HttpMethod::Patch => item.patch.as_ref(),
        HttpMethod::Delete => item.delete.as_ref(),
    }
}

fn compile_operation(
    refs: &LocalRefs,
    spec: &OpenAPI,
    input: OperationInput<'_>,
    taken: &mut HashSet<String>,
    warnings: &mut Vec<CompileWarning>,
) -> ToolDescriptor {
    let OperationInput {
        path,
        method,
        path_item,
        operation,
    } = input;
    let label = format!("{method} {path}");

    let base = derive_tool_name(operation.operation_id.as_deref(), method, path);
    let name = reserve_unique_tool_name(taken, &base);
    if name != base {
        warnings.push(CompileWarning::new(
            label.as_str(),
            format!("tool name '{base}' already taken; using '{name}'"),
        ));
    }

    let description = [&operation.summary, &operation.description]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map_or_else(|| label.clone(), str::to_string);

    let params = collect_parameters(refs, path_item, operation, &label, warnings);
    let mut seen: HashSet<&str> = HashSet::new();
    for p in &params {
        if !seen.insert(p.name.as_str()) {
            warnings.push(CompileWarning::new(
                label.as_str(),
                format!("parameter '{}' declared in several locations", p.name),
            ));
        }
    }

    let mut input_schema = ParameterSchemaMapper::map(&params);

    for placeholder in placeholders(path) {
        if input_schema.location_of(placeholder) != Some(ParamLocation::Path) {
            warnings.push(CompileWarning::new(
                label.as_str(),
                format!("path placeholder '{{{placeholder}}}' has no path parameter; assuming string"),
            ));
            input_schema.set_field(placeholder, InputField::string(ParamLocation::Path), true);
        }
    }

    let request_body = operation.request_body.as_ref().and_then(|b| match refs.resolve(b) {
        Ok(body) => Some(body),
        Err(e) => {
            warnings.push(CompileWarning::new(
                label.as_str(),
                format!("dropping request body: {e}"),
            ));
            None
        }
    });
    let mapper = ParameterSchemaMapper::new(refs);
    let (body_schema, body_required) = match mapper.try_map_request_body(request_body.as_ref()) {
        Ok(mapped) => mapped,
        Err(e) => {
            warnings.push(CompileWarning::new(
                label.as_str(),
                format!("dropping request body schema: {e}"),
            ));
            (None, request_body.as_ref().is_some_and(|b| b.required))
        }
    };

    if let Some(schema) = &body_schema {
        add_body_fields(&mut input_schema, schema, body_required, &label, warnings);
    }

    let requires_authorization = !operation
        .security
        .as_ref()
        .or(spec.security.as_ref())
        .is_some_and(Vec::is_empty);

    ToolDescriptor {
        name,
        description,
        method,
        path: path.to_string(),
        input_schema,
        body_schema,
        body_required,
        requires_authorization,
    }
}

fn collect_parameters(
    refs: &LocalRefs,
    path_item: &PathItem,
    operation: &Operation,
    label: &str,
    warnings: &mut Vec<CompileWarning>,
) -> Vec<ParamDescriptor> {
    let mut resolve = |p: &ReferenceOr<Parameter>| -> Option<ParamDescriptor> {
        let resolved = refs
            .resolve(p)
            .and_then(|param| ParamDescriptor::from_openapi(&param, refs));
        match resolved {
            Ok(d) => Some(d),
            Err(e) => {
                warnings.push(CompileWarning::new(label, format!("skipping parameter: {e}")));
                None
            }
        }
    };

    let mut merged: Vec<ParamDescriptor> =
        path_item.parameters.iter().filter_map(&mut resolve).collect();

    for p in &operation.parameters {
        let Some(d) = resolve(p) else { continue };
        if let Some(slot) = merged
            .iter_mut()
            .find(|m| m.name == d.name && m.location == d.location)
        {
            *slot = d;
        } else {
            merged.push(d);
        }
    }
    merged
}

/// Expose the request body as input fields with location `body`.
///
/// An object body is flattened into its properties; any other body becomes one `body` field.
fn add_body_fields(
    input_schema: &mut InputSchema,
    body_schema: &Value,
    body_required: bool,
    label: &str,
    warnings: &mut Vec<CompileWarning>,
) {
    let properties = body_schema.get("properties").and_then(Value::as_object);
    if !is_object_schema(body_schema) {
        let schema = body_schema.as_object().cloned().unwrap_or_default();
        insert_body_field(input_schema, "body", schema, body_required, label, warnings);
        return;
    }

    let required: HashSet<&str> = body_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (prop, schema) in properties.into_iter().flatten() {
        let schema = schema.as_object().cloned().unwrap_or_default();
        let required = body_required && required.contains(prop.as_str());
        insert_body_field(input_schema, prop, schema, required, label, warnings);
    }

    input_schema.open_body = match body_schema.get("additionalProperties") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Object(_)) => true,
        _ => false,
    };
}

fn insert_body_field(
    input_schema: &mut InputSchema,
    name: &str,
    schema: Map<String, Value>,
    required: bool,
    label: &str,
    warnings: &mut Vec<CompileWarning>,
) {
    if input_schema.field(name).is_some() {
        warnings.push(CompileWarning::new(
            label,
            format!("body property '{name}' shadowed by a parameter of the same name"),
        ));
        return;
    }
    input_schema.set_field(
        name,
        InputField {
            location: ParamLocation::Body,
            schema,
        },
        required,
    );
}

fn placeholders(path: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER
        .captures_iter(path)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
}

/// Derive a tool name from an operation id, or from `<method>_<path>` when there is none.
///
/// Runs of characters outside `[A-Za-z0-9_]` become `_`, repeated underscores collapse, leading
/// and trailing underscores are stripped and the result is lower-cased.
#[must_use]
pub fn derive_tool_name(operation_id: Option<&str>, method: HttpMethod, path: &str) -> String {
    let synthesized = || normalize_tool_name(&format!("{}_{}", method.as_lower(), path));

    let name = match operation_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => normalize_tool_name(id),
        None => synthesized(),
    };
    if !name.is_empty() {
        return name;
    }
    let name = synthesized();
    if name.is_empty() {
        "tool".to_string()
    } else {
        name
    }
}

fn normalize_tool_name(raw: &str) -> String {
    let replaced = NON_NAME.replace_all(raw, "_");
    let collapsed = UNDERSCORES.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_ascii_lowercase()
}

fn reserve_unique_tool_name(tool_names: &mut HashSet<String>, base: &str) -> String {
    let base = base.to_string();
    if tool_names.insert(base.clone()) {
        return base;
    }

    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}");
        if tool_names.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
