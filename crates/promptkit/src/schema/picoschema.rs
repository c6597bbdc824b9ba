//! Compiler for the picoschema dialect.
//!
//! Picoschema is a terse, YAML-friendly way to describe object shapes:
//!
//! ```text
//! name: string, the user's display name
//! age?: number
//! tags(array): string
//! mood(enum, how they feel): [happy, sad]
//! (*): string
//! ```
//!
//! Maps become closed objects, lists become enums, and strings name a scalar
//! type with an optional description after the first comma. Keys may carry a
//! `?` (optional) and a `(kind, description)` suffix. Inputs that already look
//! like JSON Schema pass through [`Schema::from_json_schema`].

use super::{AdditionalProperties, Property, Schema, SchemaKind, shape_name};
use crate::error::SchemaError;
use serde_json::Value;

const PASS_THROUGH_TYPES: &[&str] = &[
    "string", "number", "integer", "boolean", "null", "object", "array",
];

/// Resolves named schema references (`author: Person`).
pub trait SchemaResolver {
    fn resolve_schema(&self, name: &str) -> Option<Schema>;
}

/// Resolver that knows no names.
pub struct NoSchemas;

impl SchemaResolver for NoSchemas {
    fn resolve_schema(&self, _name: &str) -> Option<Schema> {
        None
    }
}

impl<F> SchemaResolver for F
where
    F: Fn(&str) -> Option<Schema>,
{
    fn resolve_schema(&self, name: &str) -> Option<Schema> {
        self(name)
    }
}

/// Compile a picoschema (or pass-through JSON Schema) value.
pub fn compile(value: &Value) -> Result<Schema, SchemaError> {
    compile_with(value, &NoSchemas)
}

/// Compile with named type references resolved through `resolver`.
pub fn compile_with(value: &Value, resolver: &dyn SchemaResolver) -> Result<Schema, SchemaError> {
    if is_json_schema(value) {
        return Schema::from_json_schema(value);
    }
    Compiler { resolver }.parse(value, "$")
}

/// Whether `value` is already a structural JSON Schema.
pub fn is_json_schema(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };
    let known_type = match map.get("type") {
        Some(Value::String(t)) => PASS_THROUGH_TYPES.contains(&t.as_str()),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(Value::as_str)
            .any(|t| PASS_THROUGH_TYPES.contains(&t)),
        _ => false,
    };
    known_type || map.get("properties").is_some_and(Value::is_object)
}

/// Split `"type, description"` at the first comma.
fn split_description(s: &str) -> (&str, Option<String>) {
    match s.split_once(',') {
        Some((ty, desc)) => {
            let desc = desc.trim();
            (ty.trim(), (!desc.is_empty()).then(|| desc.to_string()))
        }
        None => (s.trim(), None),
    }
}

struct Compiler<'a> {
    resolver: &'a dyn SchemaResolver,
}

impl Compiler<'_> {
    fn parse(&self, value: &Value, path: &str) -> Result<Schema, SchemaError> {
        match value {
            Value::String(s) => self.scalar(s, path),
            Value::Array(values) => Ok(Schema::new(SchemaKind::Enum {
                values: values.clone(),
            })),
            Value::Object(map) => self.object(map, path),
            other => Err(SchemaError::UnexpectedShape {
                path: path.to_string(),
                found: shape_name(other),
            }),
        }
    }

    fn scalar(&self, source: &str, path: &str) -> Result<Schema, SchemaError> {
        let (ty, description) = split_description(source);
        let kind = match ty {
            "string" => SchemaKind::String,
            "boolean" => SchemaKind::Boolean,
            "null" => SchemaKind::Null,
            "number" => SchemaKind::Number,
            "integer" => SchemaKind::Integer,
            "any" => SchemaKind::Any,
            named => {
                let mut schema = self.resolver.resolve_schema(named).ok_or_else(|| {
                    SchemaError::UnsupportedType {
                        path: path.to_string(),
                        type_name: named.to_string(),
                    }
                })?;
                if description.is_some() {
                    schema.description = description;
                }
                return Ok(schema);
            }
        };
        let mut schema = Schema::new(kind);
        schema.description = description;
        Ok(schema)
    }

    fn object(&self, map: &crate::Map, path: &str) -> Result<Schema, SchemaError> {
        let mut properties = Vec::with_capacity(map.len());
        let mut additional = AdditionalProperties::Disallowed;

        for (key, value) in map {
            let key_path = format!("{path}.{key}");
            let (head, suffix) = match key.find('(') {
                Some(open) => {
                    let rest = key.get(open + 1..).unwrap_or_default();
                    let inner = rest.strip_suffix(')').ok_or_else(|| SchemaError::MalformedKey {
                        path: path.to_string(),
                        key: key.clone(),
                    })?;
                    (key.get(..open).unwrap_or_default().trim(), Some(inner))
                }
                None => (key.trim(), None),
            };
            let (name, optional) = match head.strip_suffix('?') {
                Some(n) => (n.trim(), true),
                None => (head, false),
            };

            let Some(suffix) = suffix else {
                if name.is_empty() {
                    return Err(SchemaError::MalformedKey {
                        path: path.to_string(),
                        key: key.clone(),
                    });
                }
                let mut schema = self.parse(value, &key_path)?;
                if optional {
                    mark_optional(&mut schema);
                }
                properties.push(Property {
                    name: name.to_string(),
                    schema,
                    optional,
                });
                continue;
            };

            let (kind, description) = split_description(suffix);
            if kind == "*" {
                if !name.is_empty() {
                    return Err(SchemaError::MalformedKey {
                        path: path.to_string(),
                        key: key.clone(),
                    });
                }
                let mut schema = self.parse(value, &key_path)?;
                if description.is_some() {
                    schema.description = description;
                }
                additional = AdditionalProperties::Typed(Box::new(schema));
                continue;
            }
            if name.is_empty() {
                return Err(SchemaError::MalformedKey {
                    path: path.to_string(),
                    key: key.clone(),
                });
            }

            let mut schema = match kind {
                "array" => Schema::array(self.parse(value, &key_path)?),
                "object" => self.parse(value, &key_path)?,
                "enum" => {
                    let schema = self.parse(value, &key_path)?;
                    if !matches!(schema.kind, SchemaKind::Enum { .. }) {
                        return Err(SchemaError::EnumRequiresList { path: key_path });
                    }
                    schema
                }
                other => {
                    return Err(SchemaError::UnsupportedKind {
                        path: key_path,
                        kind: other.to_string(),
                    });
                }
            };
            if description.is_some() {
                schema.description = description;
            }
            if optional {
                mark_optional(&mut schema);
            }
            properties.push(Property {
                name: name.to_string(),
                schema,
                optional,
            });
        }

        Ok(Schema::new(SchemaKind::Object {
            properties,
            additional,
        }))
    }
}

/// Optional properties accept `null`: typed kinds become nullable and enums
/// gain a `null` value.
fn mark_optional(schema: &mut Schema) {
    match &mut schema.kind {
        SchemaKind::Enum { values } => {
            if !values.contains(&Value::Null) {
                values.push(Value::Null);
            }
        }
        SchemaKind::Any => {}
        _ => schema.nullable = true,
    }
}
