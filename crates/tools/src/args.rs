//! Keyword arguments passed to tool handlers.

use lakeops_core::Payload;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("missing required argument `{0}`")]
    Missing(String),
    #[error("argument `{key}` must be {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("argument `{key}` could not be decoded: {source}")]
    Invalid {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Open keyword-argument map.  Handlers read only the keys they know about
/// and fall back to their own defaults for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolArgs(Payload);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn str(&self, key: &str) -> Result<&str, ArgError> {
        match self.get(key) {
            None => Err(ArgError::Missing(key.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ArgError::WrongType {
                key: key.to_string(),
                expected: "a string",
            }),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    /// Integer argument.  Accepts numeric strings, since PR numbers and the
    /// like often arrive from webhooks as text.
    pub fn i64(&self, key: &str) -> Result<i64, ArgError> {
        match self.get(key) {
            None => Err(ArgError::Missing(key.to_string())),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| ArgError::WrongType {
                key: key.to_string(),
                expected: "an integer",
            }),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| ArgError::WrongType {
                key: key.to_string(),
                expected: "an integer",
            }),
            Some(_) => Err(ArgError::WrongType {
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.i64(key).unwrap_or(default)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// String list; non-string elements are skipped.  Missing → empty.
    pub fn strings(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nested mapping argument; missing → empty.
    pub fn payload(&self, key: &str) -> Result<Payload, ArgError> {
        match self.get(key) {
            None => Ok(Payload::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(ArgError::WrongType {
                key: key.to_string(),
                expected: "a mapping",
            }),
        }
    }

    /// Decode an argument into any deserializable type.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> Result<T, ArgError> {
        let value = self
            .get(key)
            .cloned()
            .ok_or_else(|| ArgError::Missing(key.to_string()))?;
        serde_json::from_value(value).map_err(|source| ArgError::Invalid {
            key: key.to_string(),
            source,
        })
    }

    pub fn as_payload(&self) -> &Payload {
        &self.0
    }

    pub fn into_payload(self) -> Payload {
        self.0
    }
}

impl From<Payload> for ToolArgs {
    fn from(map: Payload) -> Self {
        Self(map)
    }
}

/// Objects become the argument map; any other value yields no arguments.
impl From<Value> for ToolArgs {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}
