//! Declared tool arguments.
//!
//! Raw arguments from the model are checked against the declaration once,
//! at the registry boundary. Handlers only ever see [`ToolArgs`] whose
//! required keys are present and whose values already have the declared
//! type. The same declarations produce the function manifest sent to the
//! live service.

use crate::error::ToolError;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
}

impl ArgKind {
    fn manifest_type(self) -> &'static str {
        match self {
            ArgKind::String => "STRING",
            ArgKind::Integer => "NUMBER",
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ArgKind::String => "a string",
            ArgKind::Integer => "an integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ArgSpec {
    pub fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: ArgKind::String,
            required: true,
            default: None,
            description,
        }
    }

    pub fn integer(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: ArgKind::Integer,
            required: true,
            default: None,
            description,
        }
    }

    /// Makes the argument optional, falling back to `default` when absent.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    fn coerce(&self, value: &Value) -> Result<Value, ToolError> {
        let invalid = || ToolError::InvalidArgument {
            name: self.name.to_string(),
            expected: self.kind.expected(),
        };
        match self.kind {
            ArgKind::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(match n.as_f64() {
                    Some(f) if n.is_f64() && f.fract() == 0.0 => format!("{}", f as i64),
                    _ => n.to_string(),
                })),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(invalid()),
            },
            ArgKind::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                    .map(Value::from)
                    .ok_or_else(invalid),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
        }
    }
}

/// One callable tool as the model sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<ArgSpec>,
}

impl ToolSchema {
    pub fn new(name: &'static str, description: &'static str, args: Vec<ArgSpec>) -> Self {
        Self {
            name,
            description,
            args,
        }
    }

    /// Checks and coerces raw arguments. Keys not declared are dropped.
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<ToolArgs, ToolError> {
        let mut values = Map::new();
        for spec in &self.args {
            let value = match raw.get(spec.name).filter(|v| !v.is_null()) {
                Some(value) => spec.coerce(value)?,
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None if spec.required => {
                        return Err(ToolError::MissingArgument(spec.name.to_string()));
                    }
                    None => continue,
                },
            };
            values.insert(spec.name.to_string(), value);
        }
        Ok(ToolArgs { values })
    }

    /// The function declaration for this tool.
    pub fn declaration(&self) -> Value {
        let mut declaration = json!({
            "name": self.name,
            "description": self.description,
        });
        if !self.args.is_empty() {
            let properties: Map<String, Value> = self
                .args
                .iter()
                .map(|spec| {
                    (
                        spec.name.to_string(),
                        json!({
                            "type": spec.kind.manifest_type(),
                            "description": spec.description,
                        }),
                    )
                })
                .collect();
            let required: Vec<&str> = self
                .args
                .iter()
                .filter(|spec| spec.required)
                .map(|spec| spec.name)
                .collect();
            declaration["parameters"] = json!({
                "type": "OBJECT",
                "properties": properties,
                "required": required,
            });
        }
        declaration
    }
}

/// Validated arguments for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: Map<String, Value>,
}

impl ToolArgs {
    pub fn str(&self, name: &str) -> Result<&str, ToolError> {
        self.values
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::MissingArgument(name.to_string()))
    }

    pub fn int(&self, name: &str) -> Result<i64, ToolError> {
        self.values
            .get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| ToolError::MissingArgument(name.to_string()))
    }
}
