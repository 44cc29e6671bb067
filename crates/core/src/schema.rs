//! Declared input/output schemas for tools.
//!
//! Every tool describes its arguments and its result with a [`Schema`].
//! Inputs are validated leniently: the model often sends `"10"` where an
//! integer is expected, so convertible values are coerced, defaults are
//! filled in, and undeclared fields are dropped. Outputs are validated
//! strictly, because a mismatch there means the executor and its declared
//! contract have drifted apart.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::SchemaError;

/// Value type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn json_name(self) -> Option<&'static str> {
        match self {
            Self::String => Some("string"),
            Self::Integer => Some("integer"),
            Self::Number => Some("number"),
            Self::Boolean => Some("boolean"),
            Self::Array => Some("array"),
            Self::Object => Some("object"),
            Self::Any => None,
        }
    }

    fn label(self) -> &'static str {
        self.json_name().unwrap_or("any")
    }
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub description: &'static str,
    pub default: Option<Value>,
    /// Allowed string values.
    pub choices: Option<&'static [&'static str]>,
    /// Element schema for arrays of objects.
    pub items: Option<Schema>,
}

/// An ordered set of named fields describing a JSON object.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn required(self, name: &'static str, ty: FieldType, description: &'static str) -> Self {
        self.push(FieldSpec {
            name,
            ty,
            required: true,
            description,
            default: None,
            choices: None,
            items: None,
        })
    }

    pub fn optional(self, name: &'static str, ty: FieldType, description: &'static str) -> Self {
        self.push(FieldSpec {
            name,
            ty,
            required: false,
            description,
            default: None,
            choices: None,
            items: None,
        })
    }

    /// An optional field that takes `default` when absent.
    pub fn defaulted(
        self,
        name: &'static str,
        ty: FieldType,
        default: Value,
        description: &'static str,
    ) -> Self {
        self.push(FieldSpec {
            name,
            ty,
            required: false,
            description,
            default: Some(default),
            choices: None,
            items: None,
        })
    }

    /// A required string restricted to `choices`.
    pub fn one_of(
        self,
        name: &'static str,
        choices: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        self.push(FieldSpec {
            name,
            ty: FieldType::String,
            required: true,
            description,
            default: None,
            choices: Some(choices),
            items: None,
        })
    }

    /// An array whose elements are objects described by `items`.
    pub fn array_of(
        self,
        name: &'static str,
        items: Schema,
        required: bool,
        description: &'static str,
    ) -> Self {
        self.push(FieldSpec {
            name,
            ty: FieldType::Array,
            required,
            description,
            default: None,
            choices: None,
            items: Some(items),
        })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate and normalize tool arguments.
    ///
    /// `null` is treated as an empty argument object and a JSON-encoded
    /// string is decoded first. Required fields must be present, optional
    /// ones fall back to their default, and unknown fields are dropped.
    pub fn validate_input(&self, arguments: &Value) -> Result<Map<String, Value>, SchemaError> {
        self.validate_input_at("", arguments)
    }

    fn validate_input_at(
        &self,
        prefix: &str,
        arguments: &Value,
    ) -> Result<Map<String, Value>, SchemaError> {
        let object = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => map,
                _ => return Err(SchemaError::NotAnObject(value_kind(arguments).into())),
            },
            other => return Err(SchemaError::NotAnObject(value_kind(other).into())),
        };

        let mut out = Map::new();
        for spec in &self.fields {
            let path = qualify(prefix, spec.name);
            let value = match object.get(spec.name) {
                Some(Value::Null) | None => match (&spec.default, spec.required) {
                    (Some(default), _) => default.clone(),
                    (None, true) => return Err(SchemaError::MissingField(path)),
                    (None, false) => continue,
                },
                Some(value) => coerce(&path, spec.ty, value)?,
            };

            if let Some(choices) = spec.choices
                && let Some(s) = value.as_str()
                && !choices.contains(&s)
            {
                return Err(SchemaError::TypeMismatch {
                    field: path,
                    expected: format!("one of {}", choices.join(", ")),
                    found: format!("'{s}'"),
                });
            }

            let value = match (&spec.items, value) {
                (Some(items), Value::Array(elements)) => {
                    let mut checked = Vec::with_capacity(elements.len());
                    for (i, element) in elements.iter().enumerate() {
                        let at = format!("{path}[{i}]");
                        checked.push(Value::Object(items.validate_input_at(&at, element)?));
                    }
                    Value::Array(checked)
                }
                (_, value) => value,
            };

            out.insert(spec.name.to_string(), value);
        }

        for key in object.keys() {
            if self.field(key).is_none() {
                tracing::debug!(field = %qualify(prefix, key), "Dropping undeclared argument");
            }
        }

        Ok(out)
    }

    /// Strictly check a tool's raw output against this schema.
    pub fn validate_output(&self, output: &Value) -> Result<(), SchemaError> {
        let Value::Object(object) = output else {
            return Err(SchemaError::NotAnObject(value_kind(output).into()));
        };

        for spec in &self.fields {
            match object.get(spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(SchemaError::MissingField(spec.name.to_string()));
                }
                None | Some(Value::Null) => {}
                Some(value) if !matches_strict(spec.ty, value) => {
                    return Err(SchemaError::TypeMismatch {
                        field: spec.name.to_string(),
                        expected: spec.ty.label().to_string(),
                        found: value_kind(value).to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        if let Some(extra) = object.keys().find(|k| self.field(k).is_none()) {
            return Err(SchemaError::UnexpectedField(extra.clone()));
        }
        Ok(())
    }

    /// Render as a JSON Schema object for the LLM's tool definitions.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.fields {
            let mut prop = Map::new();
            if let Some(ty) = spec.ty.json_name() {
                prop.insert("type".into(), json!(ty));
            }
            prop.insert("description".into(), json!(spec.description));
            if let Some(default) = &spec.default {
                prop.insert("default".into(), default.clone());
            }
            if let Some(choices) = spec.choices {
                prop.insert("enum".into(), json!(choices));
            }
            if let Some(items) = &spec.items {
                prop.insert("items".into(), items.to_json_schema());
            }
            properties.insert(spec.name.to_string(), Value::Object(prop));
            if spec.required {
                required.push(spec.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A tool's output after it has been checked against the tool's output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolPayload(Map<String, Value>);

impl ToolPayload {
    /// Check `raw` against `schema` and wrap it.
    pub fn wrap(schema: &Schema, raw: Value) -> Result<Self, SchemaError> {
        schema.validate_output(&raw)?;
        match raw {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(SchemaError::NotAnObject(value_kind(&other).into())),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap back into the raw JSON value.
    pub fn into_raw(self) -> Value {
        Value::Object(self.0)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn coerce(field: &str, ty: FieldType, value: &Value) -> Result<Value, SchemaError> {
    let mismatch = || SchemaError::TypeMismatch {
        field: field.to_string(),
        expected: ty.label().to_string(),
        found: value_kind(value).to_string(),
    };

    let coerced = match (ty, value) {
        (FieldType::Any, v) => Some(v.clone()),
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldType::Integer, Value::Number(n)) => n
            .as_i64()
            .map(Value::from)
            .or_else(|| n.as_u64().map(Value::from))
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| Value::from(f as i64))),
        (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (FieldType::Number, Value::Number(_)) => Some(value.clone()),
        (FieldType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::Array, Value::Array(_)) => Some(value.clone()),
        (FieldType::Object, Value::Object(_)) => Some(value.clone()),
        (FieldType::Array | FieldType::Object, Value::String(raw)) => {
            match (ty, serde_json::from_str::<Value>(raw)) {
                (FieldType::Array, Ok(v @ Value::Array(_))) => Some(v),
                (FieldType::Object, Ok(v @ Value::Object(_))) => Some(v),
                _ => None,
            }
        }
        _ => None,
    };
    coerced.ok_or_else(mismatch)
}

fn matches_strict(ty: FieldType, value: &Value) -> bool {
    match ty {
        FieldType::Any => true,
        FieldType::String => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    }
}

/// Short name of a JSON value's kind, for error messages.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
