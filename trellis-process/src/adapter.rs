//! Process adapter contract.
//!
//! A supervisor hands parameters to a worker through namespaced environment
//! variables and reads back exactly one JSON line from its standard output.
//! Parameters travel twice: once per field (`TRELLIS_ARG_NAME=Ada`) and once
//! as an aggregate object (`TRELLIS_ARGS={"name":"Ada"}`). The per-field
//! variable wins when both are present.

use std::collections::BTreeMap;
use std::io::Write;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AdapterError, Result};

/// Prefix of the per-field parameter variables.
pub const ARG_PREFIX: &str = "TRELLIS_ARG_";

/// Variable carrying every parameter as one JSON object.
pub const ARGS_VAR: &str = "TRELLIS_ARGS";

/// Value of the `source` field written by the fixtures.
pub const SOURCE: &str = "Process Adapter";

/// Default for the `name` parameter of the greeting fixture.
pub const DEFAULT_NAME: &str = "World";

/// Parameters passed to one worker process.
///
/// Keys are stored lower-cased so `TRELLIS_ARG_NAME` and `{"name": ...}`
/// address the same parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    params: BTreeMap<String, String>,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter. Fails if the key cannot be expressed as an
    /// environment variable name.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Result<Self> {
        let key = normalize_key(key)?;
        self.params.insert(key, value.into());
        Ok(self)
    }

    /// Read the invocation from the current process environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    /// Build an invocation from an explicit list of environment pairs.
    ///
    /// Unrelated variables are ignored, empty values count as absent, and an
    /// aggregate `TRELLIS_ARGS` that is not a JSON object is treated as empty.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut aggregate = BTreeMap::new();
        let mut fields = BTreeMap::new();

        for (name, value) in vars {
            let name = name.as_ref();
            let value = value.into();

            if name == ARGS_VAR {
                aggregate = parse_aggregate(&value);
            } else if let Some(raw_key) = name.strip_prefix(ARG_PREFIX) {
                match normalize_key(raw_key) {
                    Ok(key) => {
                        if !value.is_empty() {
                            fields.insert(key, value);
                        }
                    }
                    Err(e) => warn!(variable = %name, error = %e, "skipping parameter variable"),
                }
            }
        }

        aggregate.extend(fields);
        Self { params: aggregate }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a parameter, substituting the documented default when absent.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Look up a parameter that has no safe default.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| AdapterError::MissingField(key.to_string()))
    }

    /// Parse a parameter, falling back to `default` when it is absent.
    /// A present but unparsable value is an input error, not a default.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| AdapterError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Environment pairs a supervisor sets before spawning the worker.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| (format!("{}{}", ARG_PREFIX, k.to_ascii_uppercase()), v.clone()))
            .collect();

        let aggregate: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        env.push((ARGS_VAR.to_string(), Value::Object(aggregate).to_string()));
        env
    }
}

fn normalize_key(key: &str) -> Result<String> {
    let valid = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(AdapterError::InvalidKey(key.to_string()));
    }
    Ok(key.to_ascii_lowercase())
}

fn parse_aggregate(raw: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if raw.trim().is_empty() {
        return params;
    }

    let object = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(object)) => object,
        Ok(other) => {
            debug!(kind = json_kind(&other), "{} is not an object, ignoring", ARGS_VAR);
            return params;
        }
        Err(e) => {
            debug!(error = %e, "{} is not valid JSON, ignoring", ARGS_VAR);
            return params;
        }
    };

    for (key, value) in object {
        let Ok(key) = normalize_key(&key) else {
            warn!(key = %key, "skipping aggregate parameter with invalid key");
            continue;
        };
        let rendered = match value {
            Value::Null => continue,
            Value::String(s) => s,
            other => other.to_string(),
        };
        if !rendered.is_empty() {
            params.insert(key, rendered);
        }
    }
    params
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The single structured record a worker writes on success.
///
/// Readers look up the fields they know and ignore the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRecord {
    fields: Map<String, Value>,
}

impl ResultRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(field.to_string(), Value::String(value.into()));
        self
    }

    /// String value of a field, if present and a string.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Decode into a caller-defined shape. Unknown fields are ignored.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|e| AdapterError::MalformedResult(e.to_string()))
    }

    /// Write the record as one JSON line and flush.
    pub fn emit<W: Write>(&self, mut out: W) -> Result<()> {
        let line =
            serde_json::to_string(self).map_err(|e| AdapterError::Output(e.to_string()))?;
        writeln!(out, "{}", line).map_err(|e| AdapterError::Output(e.to_string()))?;
        out.flush().map_err(|e| AdapterError::Output(e.to_string()))
    }

    /// Read the record back from a worker's captured standard output.
    ///
    /// Standard output must hold exactly one non-empty line, the record.
    /// Any other output on the success path breaks the contract.
    pub fn parse(stdout: &str) -> Result<Self> {
        let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        let line = lines.next().ok_or(AdapterError::MissingResult)?;
        let extra = lines.count();
        if extra > 0 {
            return Err(AdapterError::MalformedResult(format!(
                "expected exactly one line on standard output, found {}",
                extra + 1
            )));
        }

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(other) => Err(AdapterError::MalformedResult(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
            Err(e) => Err(AdapterError::MalformedResult(e.to_string())),
        }
    }
}

/// Greeting produced by the `process-adapter` fixture.
pub fn greeting(invocation: &Invocation) -> ResultRecord {
    let name = invocation.get_or("name", DEFAULT_NAME);
    ResultRecord::new()
        .with("greeting", format!("Hello, {}!", name))
        .with("source", SOURCE)
}
