//! Methodology definitions and parameter schemas.

use crate::{
    error::{EngineError, EngineResult, ExecutionError},
    types::{MethodologyId, Timestamp},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodologyType {
    Quantitative,
    Qualitative,
    Hybrid,
}

impl MethodologyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quantitative => "quantitative",
            Self::Qualitative  => "qualitative",
            Self::Hybrid       => "hybrid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quantitative" => Some(Self::Quantitative),
            "qualitative"  => Some(Self::Qualitative),
            "hybrid"       => Some(Self::Hybrid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Number,
    Integer,
    Boolean,
    String,
    Array,
    Object,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Number  => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::String  => "string",
            Self::Array   => "array",
            Self::Object  => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Number  => value.as_f64().is_some_and(f64::is_finite),
            Self::Integer => value.as_f64().is_some_and(|v| v.is_finite() && v.fract() == 0.0),
            Self::Boolean => value.is_boolean(),
            Self::String  => value.is_string(),
            Self::Array   => value.is_array(),
            Self::Object  => value.is_object(),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

/// One entry of a methodology's ordered parameter schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: &str, kind: ParameterKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            min: None,
            max: None,
            default: None,
            allowed: None,
            description: None,
        }
    }

    pub fn bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    /// Check `value` against kind, bounds and enumeration.
    fn check(&self, value: &Value) -> Result<(), String> {
        if !self.kind.accepts(value) {
            return Err(format!(
                "parameter '{}' must be of type {}, got {}",
                self.name,
                self.kind.as_str(),
                value
            ));
        }
        if self.kind.is_numeric() {
            let v = value.as_f64().unwrap_or(f64::NAN);
            if let Some(min) = self.min {
                if v < min {
                    return Err(format!("parameter '{}' = {v} is below minimum {min}", self.name));
                }
            }
            if let Some(max) = self.max {
                if v > max {
                    return Err(format!("parameter '{}' = {v} is above maximum {max}", self.name));
                }
            }
        }
        if let (Some(allowed), Some(s)) = (&self.allowed, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(format!(
                    "parameter '{}' = '{s}' is not one of [{}]",
                    self.name,
                    allowed.join(", ")
                ));
            }
        }
        Ok(())
    }
}

/// Caller-supplied content of a methodology (everything but identity
/// and timestamps).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologyDefinition {
    pub name: String,
    pub methodology_type: MethodologyType,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameter_schema: Vec<ParameterSpec>,
    pub calculation_routine: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// A stored methodology. Instances are immutable once published by the
/// registry; edits replace the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Methodology {
    pub id: MethodologyId,
    pub name: String,
    pub methodology_type: MethodologyType,
    pub framework: Option<String>,
    pub description: Option<String>,
    pub parameter_schema: Vec<ParameterSpec>,
    pub calculation_routine: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Methodology {
    pub fn summary(&self) -> MethodologySummary {
        MethodologySummary {
            id: self.id.clone(),
            name: self.name.clone(),
            methodology_type: self.methodology_type,
            framework: self.framework.clone(),
            is_active: self.is_active,
            parameter_count: self.parameter_schema.len(),
            updated_at: self.updated_at,
        }
    }

    pub fn definition(&self) -> MethodologyDefinition {
        MethodologyDefinition {
            name: self.name.clone(),
            methodology_type: self.methodology_type,
            framework: self.framework.clone(),
            description: self.description.clone(),
            parameter_schema: self.parameter_schema.clone(),
            calculation_routine: self.calculation_routine.clone(),
            is_active: self.is_active,
        }
    }

    /// Bind caller parameters against the schema: defaults are filled in,
    /// kinds, bounds and enumerations are checked, unknown keys rejected.
    /// The returned object is a fresh copy owned by one run.
    pub fn bind_parameters(&self, params: &Value) -> Result<Map<String, Value>, ExecutionError> {
        let supplied = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ExecutionError::InvalidParameter(format!(
                    "parameters must be an object, got {other}"
                )))
            }
        };

        for key in supplied.keys() {
            if !self.parameter_schema.iter().any(|p| &p.name == key) {
                return Err(ExecutionError::InvalidParameter(format!(
                    "unknown parameter '{key}' for methodology '{}'",
                    self.name
                )));
            }
        }

        let mut bound = Map::new();
        for spec in &self.parameter_schema {
            let value = match supplied.get(&spec.name).or(spec.default.as_ref()) {
                Some(v) => v.clone(),
                None => {
                    return Err(ExecutionError::InvalidParameter(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )))
                }
            };
            spec.check(&value).map_err(ExecutionError::InvalidParameter)?;
            bound.insert(spec.name.clone(), value);
        }
        Ok(bound)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodologySummary {
    pub id: MethodologyId,
    pub name: String,
    pub methodology_type: MethodologyType,
    pub framework: Option<String>,
    pub is_active: bool,
    pub parameter_count: usize,
    pub updated_at: Timestamp,
}

/// Internal consistency of a parameter schema.
pub fn check_schema(schema: &[ParameterSpec]) -> EngineResult<()> {
    let mut seen = HashSet::new();
    for spec in schema {
        if spec.name.trim().is_empty() {
            return Err(EngineError::InvalidSchema("parameter name must not be empty".into()));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(EngineError::InvalidSchema(format!(
                "duplicate parameter '{}'",
                spec.name
            )));
        }
        if (spec.min.is_some() || spec.max.is_some()) && !spec.kind.is_numeric() {
            return Err(EngineError::InvalidSchema(format!(
                "parameter '{}': bounds are only valid on numeric parameters",
                spec.name
            )));
        }
        if let (Some(min), Some(max)) = (spec.min, spec.max) {
            if min > max {
                return Err(EngineError::InvalidSchema(format!(
                    "parameter '{}': min {min} exceeds max {max}",
                    spec.name
                )));
            }
        }
        if spec.allowed.is_some() && spec.kind != ParameterKind::String {
            return Err(EngineError::InvalidSchema(format!(
                "parameter '{}': allowed values are only valid on string parameters",
                spec.name
            )));
        }
        if let Some(default) = &spec.default {
            spec.check(default).map_err(|reason| {
                EngineError::InvalidSchema(format!("default rejected: {reason}"))
            })?;
        }
    }
    Ok(())
}
