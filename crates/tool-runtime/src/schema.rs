//! Declared tool parameters and validation of model-supplied input.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Integer => "integer",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterType,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, kind: ParameterType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParameterType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// A validated parameter value, tagged by its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl ParamValue {
    fn from_json(kind: ParameterType, value: Value) -> Option<Self> {
        match (kind, value) {
            (ParameterType::String, Value::String(s)) => Some(ParamValue::String(s)),
            (ParameterType::Integer, Value::Number(n)) => n.as_i64().map(ParamValue::Integer),
            (ParameterType::Number, Value::Number(n)) => n.as_f64().map(ParamValue::Number),
            (ParameterType::Boolean, Value::Bool(b)) => Some(ParamValue::Boolean(b)),
            (ParameterType::Array, Value::Array(items)) => Some(ParamValue::Array(items)),
            (ParameterType::Object, Value::Object(map)) => Some(ParamValue::Object(map)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::Integer(i) => json!(i),
            ParamValue::Number(n) => json!(n),
            ParamValue::Boolean(b) => Value::Bool(*b),
            ParamValue::Array(items) => Value::Array(items.clone()),
            ParamValue::Object(map) => Value::Object(map.clone()),
        }
    }
}

/// Validated, typed tool input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolParams(BTreeMap<String, ParamValue>);

impl ToolParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.0.get(name) {
            Some(ParamValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.0.get(name) {
            Some(ParamValue::Number(n)) => Some(*n),
            Some(ParamValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.0.get(name) {
            Some(ParamValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("parameter '{name}' must be of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check model-supplied input against the declared parameters.
///
/// `null` is treated as an empty object. Explicit `null` values for optional
/// parameters count as absent.
pub fn validate(specs: &[ParameterSpec], input: Value) -> Result<ToolParams, SchemaError> {
    let mut object = match input {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => return Err(SchemaError::NotAnObject(json_type_name(&other))),
    };

    if let Some(unknown) = object
        .keys()
        .find(|key| !specs.iter().any(|s| &s.name == *key))
    {
        return Err(SchemaError::UnknownParameter(unknown.clone()));
    }

    let mut params = BTreeMap::new();
    for spec in specs {
        match object.remove(&spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(SchemaError::MissingParameter(spec.name.clone()));
                }
            }
            Some(value) => {
                let typed = ParamValue::from_json(spec.kind, value).ok_or_else(|| {
                    SchemaError::TypeMismatch {
                        name: spec.name.clone(),
                        expected: spec.kind.as_str(),
                    }
                })?;
                params.insert(spec.name.clone(), typed);
            }
        }
    }
    Ok(ToolParams(params))
}

/// Render declared parameters as a JSON Schema object for the model.
pub fn to_json_schema(specs: &[ParameterSpec]) -> Value {
    let properties: Map<String, Value> = specs
        .iter()
        .map(|s| {
            (
                s.name.clone(),
                json!({ "type": s.kind.as_str(), "description": s.description }),
            )
        })
        .collect();
    let required: Vec<&str> = specs
        .iter()
        .filter(|s| s.required)
        .map(|s| s.name.as_str())
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
