//! Local `$ref` resolution.
//!
//! The `openapiv3` crate models `$ref`s using `ReferenceOr<T>` but does not resolve them. This
//! resolver handles document-local references (`#/components/...`) by looking up JSON pointers
//! in a JSON copy of the document. External file/URL references are reported as unresolvable so
//! the caller can degrade instead of failing the whole catalog.

use openapiv3::{OpenAPI, ReferenceOr};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

/// Nesting guard for pathological (non-cyclic but very deep) schemas.
const MAX_INLINE_DEPTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("unsupported external $ref '{0}'")]
    External(String),
    #[error("unresolved $ref '{0}'")]
    Unresolved(String),
    #[error("cyclic $ref '{0}'")]
    Cyclic(String),
    #[error("$ref '{reference}' has an unexpected shape: {message}")]
    Shape { reference: String, message: String },
}

/// JSON view of one `OpenAPI` document used for pointer lookups.
pub struct LocalRefs {
    root: Value,
}

impl LocalRefs {
    #[must_use]
    pub fn new(spec: &OpenAPI) -> Self {
        // Serializing an already-parsed document cannot fail; fall back to an empty root anyway.
        let root = serde_json::to_value(spec).unwrap_or(Value::Null);
        Self { root }
    }

    /// Resolve a `ReferenceOr<T>` to an owned item, following chains of references.
    ///
    /// # Errors
    ///
    /// Returns an error for external, missing, cyclic or mistyped references.
    pub fn resolve<T>(&self, r: &ReferenceOr<T>) -> Result<T, RefError>
    where
        T: Clone + DeserializeOwned,
    {
        let mut seen: HashSet<String> = HashSet::new();
        let mut cur: ReferenceOr<T> = r.clone();
        loop {
            match cur {
                ReferenceOr::Item(item) => return Ok(item),
                ReferenceOr::Reference { reference } => {
                    if !seen.insert(reference.clone()) {
                        return Err(RefError::Cyclic(reference));
                    }
                    let value = self.lookup(&reference)?;
                    cur = serde_json::from_value(value.clone()).map_err(|e| RefError::Shape {
                        reference: reference.clone(),
                        message: e.to_string(),
                    })?;
                }
            }
        }
    }

    /// Produce a self-contained JSON Schema from an `OpenAPI` schema fragment.
    ///
    /// Local `$ref`s are inlined; a reference back into a schema that is already being inlined
    /// becomes an unconstrained `{}` so recursive models stay finite. `nullable: true` becomes a
    /// `null` member of `type`.
    ///
    /// # Errors
    ///
    /// Returns an error for external or missing references.
    pub fn inline_schema(&self, schema: &Value) -> Result<Value, RefError> {
        let mut stack: Vec<String> = Vec::new();
        self.inline_value(schema, &mut stack)
    }

    fn lookup(&self, reference: &str) -> Result<&Value, RefError> {
        let Some(pointer) = reference.strip_prefix('#') else {
            return Err(RefError::External(reference.to_string()));
        };
        if !pointer.starts_with('/') {
            return Err(RefError::External(reference.to_string()));
        }
        self.root
            .pointer(pointer)
            .ok_or_else(|| RefError::Unresolved(reference.to_string()))
    }

    fn inline_value(&self, value: &Value, stack: &mut Vec<String>) -> Result<Value, RefError> {
        match value {
            Value::Object(obj) => {
                if let Some(Value::String(reference)) = obj.get("$ref") {
                    if stack.iter().any(|r| r == reference) || stack.len() >= MAX_INLINE_DEPTH {
                        return Ok(Value::Object(Map::new()));
                    }
                    let target = self.lookup(reference)?;
                    stack.push(reference.clone());
                    let inlined = self.inline_value(target, stack);
                    stack.pop();
                    return inlined;
                }

                let mut out = Map::with_capacity(obj.len());
                for (k, v) in obj {
                    if let ("properties", Value::Object(props)) = (k.as_str(), v) {
                        let mut inlined = Map::with_capacity(props.len());
                        for (name, prop) in props {
                            inlined.insert(name.clone(), self.inline_value(prop, stack)?);
                        }
                        out.insert(k.clone(), Value::Object(inlined));
                    } else if matches!(k.as_str(), "example" | "examples" | "default" | "enum") {
                        // Literal payloads are not schemas.
                        out.insert(k.clone(), v.clone());
                    } else {
                        out.insert(k.clone(), self.inline_value(v, stack)?);
                    }
                }
                apply_nullable(&mut out);
                apply_exclusive_bounds(&mut out);
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|v| self.inline_value(v, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

fn apply_nullable(obj: &mut Map<String, Value>) {
    if obj.get("nullable") != Some(&Value::Bool(true)) {
        obj.remove("nullable");
        return;
    }
    obj.remove("nullable");
    if let Some(Value::String(t)) = obj.get("type").cloned() {
        obj.insert(
            "type".to_string(),
            Value::Array(vec![Value::String(t), Value::String("null".to_string())]),
        );
    }
}

/// `OpenAPI` 3.0 boolean `exclusiveMinimum`/`exclusiveMaximum` -> JSON Schema numeric form.
fn apply_exclusive_bounds(obj: &mut Map<String, Value>) {
    for (flag, bound) in [("exclusiveMinimum", "minimum"), ("exclusiveMaximum", "maximum")] {
        match obj.get(flag) {
            Some(Value::Bool(true)) => {
                obj.remove(flag);
                if let Some(limit) = obj.remove(bound) {
                    obj.insert(flag.to_string(), limit);
                }
            }
            Some(Value::Bool(false)) => {
                obj.remove(flag);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openapiv3::Parameter;
    use serde_json::json;

    fn spec() -> OpenAPI {
        serde_json::from_value(json!({
            "openapi": "3.0.3",
            "info": {"title": "t", "version": "1"},
            "paths": {},
            "components": {
                "parameters": {
                    "Limit": {"name": "limit", "in": "query", "schema": {"type": "integer"}},
                    "Alias": {"$ref": "#/components/parameters/Limit"}
                },
                "schemas": {
                    "Pet": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string", "nullable": true},
                            "tag": {"$ref": "#/components/schemas/Tag"},
                            "parent": {"$ref": "#/components/schemas/Pet"}
                        }
                    },
                    "Tag": {"type": "string", "enum": ["a", "b"]}
                }
            }
        }))
        .expect("spec")
    }

    #[test]
    fn resolves_chained_parameter_refs() {
        let refs = LocalRefs::new(&spec());
        let p: ReferenceOr<Parameter> = ReferenceOr::Reference {
            reference: "#/components/parameters/Alias".to_string(),
        };
        let resolved = refs.resolve(&p).expect("resolved");
        let Parameter::Query { parameter_data, .. } = resolved else {
            panic!("expected query parameter");
        };
        assert_eq!(parameter_data.name, "limit");
    }

    #[test]
    fn inlines_schema_refs_and_breaks_cycles() {
        let refs = LocalRefs::new(&spec());
        let out = refs
            .inline_schema(&json!({"$ref": "#/components/schemas/Pet"}))
            .expect("inlined");
        assert_eq!(out["properties"]["tag"], json!({"type": "string", "enum": ["a", "b"]}));
        assert_eq!(out["properties"]["parent"], json!({}));
        assert_eq!(out["properties"]["name"]["type"], json!(["string", "null"]));
    }

    #[test]
    fn converts_boolean_exclusive_bounds() {
        let refs = LocalRefs::new(&spec());
        let out = refs
            .inline_schema(&json!({"type": "integer", "minimum": 1, "exclusiveMinimum": true, "exclusiveMaximum": false}))
            .expect("inlined");
        assert_eq!(out, json!({"type": "integer", "exclusiveMinimum": 1}));
    }

    #[test]
    fn external_and_missing_refs_are_errors() {
        let refs = LocalRefs::new(&spec());
        assert!(matches!(
            refs.inline_schema(&json!({"$ref": "common.yaml#/Pet"})),
            Err(RefError::External(_))
        ));
        assert!(matches!(
            refs.inline_schema(&json!({"$ref": "#/components/schemas/Missing"})),
            Err(RefError::Unresolved(_))
        ));
    }
}
