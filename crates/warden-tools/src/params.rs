//! Loosely typed tool arguments supplied by the model, with typed extraction helpers.

use std::collections::BTreeMap;

/// One argument value as the model sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

impl From<serde_json::Value> for ArgValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Argument extraction failure, reported to the model without touching the mediator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgError {
    #[error("missing required parameter: {name}")]
    Missing { name: String },

    #[error("parameter `{name}` must be a {expected}, got {actual}")]
    WrongType {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("arguments must be a JSON object")]
    NotAnObject,
}

/// Tool call arguments keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ToolArgs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build arguments from a JSON value, which must be an object (or null for no arguments).
    ///
    /// # Errors
    ///
    /// Returns [`ArgError::NotAnObject`] for any other JSON shape.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ArgError> {
        match ArgValue::from(value) {
            ArgValue::Object(values) => Ok(Self { values }),
            ArgValue::Null => Ok(Self::default()),
            _ => Err(ArgError::NotAnObject),
        }
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.values.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    /// # Errors
    ///
    /// Returns [`ArgError`] when the parameter is absent, null, or not a string.
    pub fn required_str(&self, name: &str) -> Result<&str, ArgError> {
        self.optional_str(name)?.ok_or_else(|| ArgError::Missing {
            name: name.to_owned(),
        })
    }

    /// # Errors
    ///
    /// Returns [`ArgError::WrongType`] when the parameter is present but not a string.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ArgError> {
        match self.values.get(name) {
            None | Some(ArgValue::Null) => Ok(None),
            Some(ArgValue::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(wrong_type(name, "string", other)),
        }
    }

    /// # Errors
    ///
    /// Returns [`ArgError::WrongType`] when the parameter is present but not a boolean.
    pub fn optional_bool(&self, name: &str) -> Result<Option<bool>, ArgError> {
        match self.values.get(name) {
            None | Some(ArgValue::Null) => Ok(None),
            Some(ArgValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(wrong_type(name, "boolean", other)),
        }
    }

    /// # Errors
    ///
    /// Returns [`ArgError::WrongType`] unless the parameter is a non-negative integer.
    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, ArgError> {
        match self.values.get(name) {
            None | Some(ArgValue::Null) => Ok(None),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Some(ArgValue::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => Ok(Some(*n as u64)),
            Some(other) => Err(wrong_type(name, "non-negative integer", other)),
        }
    }
}

fn wrong_type(name: &str, expected: &'static str, actual: &ArgValue) -> ArgError {
    ArgError::WrongType {
        name: name.to_owned(),
        expected,
        actual: actual.type_name(),
    }
}
