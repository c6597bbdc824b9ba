//! Normalized structural schemas.
//!
//! [`Schema`] is the single schema representation the rest of the crate
//! works with. It is produced by the [`picoschema`] compiler (compact
//! dialect or JSON Schema pass-through) or inferred from an example value,
//! and converts to standard JSON Schema for model requests and validation.
//!
//! Object properties are a `Vec`, not a map: order always follows the
//! input, so two compilations of the same source compare equal and
//! generated documentation is stable.

pub mod picoschema;

use crate::Map;
use crate::error::SchemaError;
use serde_json::{Value, json};

/// Keys consumed by pass-through parsing. Anything else lands in
/// [`Schema::extensions`].
const HANDLED_KEYS: &[&str] = &[
    "type",
    "properties",
    "required",
    "items",
    "enum",
    "description",
    "additionalProperties",
];

/// Structural description of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub kind: SchemaKind,
    pub description: Option<String>,
    /// Whether `null` is accepted in addition to `kind`.
    pub nullable: bool,
    /// JSON Schema keywords this type does not model (`format`, `minimum`,
    /// ...), preserved verbatim.
    pub extensions: Map,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    /// No type constraint.
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Array {
        items: Box<Schema>,
    },
    Object {
        properties: Vec<Property>,
        additional: AdditionalProperties,
    },
    Enum {
        values: Vec<Value>,
    },
}

/// A named object property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: Schema,
    /// Optional properties are left out of `required`.
    pub optional: bool,
}

/// Policy for object keys not listed in `properties`.
#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalProperties {
    Disallowed,
    Allowed,
    Typed(Box<Schema>),
}

impl Schema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
            nullable: false,
            extensions: Map::new(),
        }
    }

    pub fn any() -> Self {
        Self::new(SchemaKind::Any)
    }

    pub fn string() -> Self {
        Self::new(SchemaKind::String)
    }

    pub fn number() -> Self {
        Self::new(SchemaKind::Number)
    }

    pub fn boolean() -> Self {
        Self::new(SchemaKind::Boolean)
    }

    pub fn array(items: Schema) -> Self {
        Self::new(SchemaKind::Array {
            items: Box::new(items),
        })
    }

    /// A closed object (`additionalProperties: false`).
    pub fn object(properties: Vec<Property>) -> Self {
        Self::new(SchemaKind::Object {
            properties,
            additional: AdditionalProperties::Disallowed,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The JSON Schema `type` name for this kind, if it has one.
    pub fn type_name(&self) -> Option<&'static str> {
        match self.kind {
            SchemaKind::Any | SchemaKind::Enum { .. } => None,
            SchemaKind::String => Some("string"),
            SchemaKind::Number => Some("number"),
            SchemaKind::Integer => Some("integer"),
            SchemaKind::Boolean => Some("boolean"),
            SchemaKind::Null => Some("null"),
            SchemaKind::Array { .. } => Some("array"),
            SchemaKind::Object { .. } => Some("object"),
        }
    }

    /// Object properties, or an empty slice for non-object schemas.
    pub fn properties(&self) -> &[Property] {
        match &self.kind {
            SchemaKind::Object { properties, .. } => properties,
            _ => &[],
        }
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties().iter().find(|p| p.name == name)
    }

    /// Names of non-optional properties, in declaration order.
    pub fn required(&self) -> Vec<&str> {
        self.properties()
            .iter()
            .filter(|p| !p.optional)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Render as standard JSON Schema.
    pub fn to_json_schema(&self) -> Value {
        let mut out = Map::new();
        if let Some(name) = self.type_name() {
            let ty = if self.nullable && name != "null" {
                json!([name, "null"])
            } else {
                json!(name)
            };
            out.insert("type".into(), ty);
        }
        match &self.kind {
            SchemaKind::Array { items } => {
                out.insert("items".into(), items.to_json_schema());
            }
            SchemaKind::Object {
                properties,
                additional,
            } => {
                let mut props = Map::new();
                for p in properties {
                    props.insert(p.name.clone(), p.schema.to_json_schema());
                }
                out.insert("properties".into(), Value::Object(props));
                let required = self.required();
                if !required.is_empty() {
                    out.insert("required".into(), json!(required));
                }
                match additional {
                    AdditionalProperties::Disallowed => {
                        out.insert("additionalProperties".into(), Value::Bool(false));
                    }
                    AdditionalProperties::Allowed => {}
                    AdditionalProperties::Typed(s) => {
                        out.insert("additionalProperties".into(), s.to_json_schema());
                    }
                }
            }
            SchemaKind::Enum { values } => {
                out.insert("enum".into(), Value::Array(values.clone()));
            }
            _ => {}
        }
        if let Some(ref d) = self.description {
            out.insert("description".into(), Value::String(d.clone()));
        }
        for (k, v) in &self.extensions {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Value::Object(out)
    }

    /// Parse a standard JSON Schema value into a [`Schema`].
    pub fn from_json_schema(value: &Value) -> Result<Schema, SchemaError> {
        from_json_at(value, "$")
    }

    /// Infer a schema from an example value. Objects list every key as a
    /// required property in example order and accept extra keys; arrays take
    /// their item schema from the first element.
    pub fn infer(example: &Value) -> Schema {
        match example {
            Value::Null => Schema::new(SchemaKind::Null),
            Value::Bool(_) => Schema::boolean(),
            Value::Number(_) => Schema::number(),
            Value::String(_) => Schema::string(),
            Value::Array(items) => {
                Schema::array(items.first().map(Schema::infer).unwrap_or_else(Schema::any))
            }
            Value::Object(map) => Schema::new(SchemaKind::Object {
                properties: map
                    .iter()
                    .map(|(k, v)| Property {
                        name: k.clone(),
                        schema: Schema::infer(v),
                        optional: false,
                    })
                    .collect(),
                additional: AdditionalProperties::Allowed,
            }),
        }
    }

    /// Validate `value` against this schema.
    ///
    /// Returns one human-readable line per violation, prefixed with the
    /// JSON pointer of the offending location.
    pub fn validate(&self, value: &Value) -> Result<(), Vec<String>> {
        validate_json(&self.to_json_schema(), value)
    }
}

/// Validate `value` against a raw JSON Schema. An invalid schema accepts
/// everything.
pub fn validate_json(schema: &Value, value: &Value) -> Result<(), Vec<String>> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| {
            let path = e.instance_path().to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{path}: {e}")
            }
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Short name of a JSON value's shape, for error messages.
pub(crate) fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn from_json_at(value: &Value, path: &str) -> Result<Schema, SchemaError> {
    let map = match value {
        Value::Object(m) => m,
        Value::Bool(true) => return Ok(Schema::any()),
        other => {
            return Err(SchemaError::UnexpectedShape {
                path: path.to_string(),
                found: shape_name(other),
            });
        }
    };

    let (type_name, nullable) = match map.get("type") {
        None => (None, false),
        Some(Value::String(t)) => (Some(t.as_str()), false),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();
            match non_null.as_slice() {
                [] => (Some("null"), false),
                [single] => (Some(*single), nullable),
                // Unions beyond T|null stay as an unconstrained kind and keep
                // the original `type` keyword in extensions.
                _ => (None, false),
            }
        }
        Some(other) => {
            return Err(SchemaError::UnexpectedShape {
                path: format!("{path}.type"),
                found: shape_name(other),
            });
        }
    };

    let kind = if let Some(Value::Array(values)) = map.get("enum") {
        SchemaKind::Enum {
            values: values.clone(),
        }
    } else if map.get("properties").is_some_and(Value::is_object) || type_name == Some("object") {
        let required: Vec<&str> = map
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let mut properties = Vec::new();
        if let Some(Value::Object(props)) = map.get("properties") {
            for (name, prop) in props {
                properties.push(Property {
                    name: name.clone(),
                    schema: from_json_at(prop, &format!("{path}.{name}"))?,
                    optional: !required.contains(&name.as_str()),
                });
            }
        }
        let additional = match map.get("additionalProperties") {
            None | Some(Value::Bool(true)) => AdditionalProperties::Allowed,
            Some(Value::Bool(false)) => AdditionalProperties::Disallowed,
            Some(s) => AdditionalProperties::Typed(Box::new(from_json_at(
                s,
                &format!("{path}.additionalProperties"),
            )?)),
        };
        SchemaKind::Object {
            properties,
            additional,
        }
    } else {
        match type_name {
            None => SchemaKind::Any,
            Some("string") => SchemaKind::String,
            Some("number") => SchemaKind::Number,
            Some("integer") => SchemaKind::Integer,
            Some("boolean") => SchemaKind::Boolean,
            Some("null") => SchemaKind::Null,
            Some("array") => SchemaKind::Array {
                items: Box::new(match map.get("items") {
                    Some(items) => from_json_at(items, &format!("{path}[]"))?,
                    None => Schema::any(),
                }),
            },
            Some(other) => {
                return Err(SchemaError::UnsupportedType {
                    path: path.to_string(),
                    type_name: other.to_string(),
                });
            }
        }
    };

    let mut extensions = Map::new();
    for (k, v) in map {
        if !HANDLED_KEYS.contains(&k.as_str()) {
            extensions.insert(k.clone(), v.clone());
        }
    }
    // Keep `type` when it was an enum companion or a wide union.
    if let Some(t) = map.get("type")
        && (matches!(kind, SchemaKind::Enum { .. }) || type_name.is_none())
    {
        extensions.insert("type".into(), t.clone());
    }

    Ok(Schema {
        kind,
        description: map
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        nullable,
        extensions,
    })
}
