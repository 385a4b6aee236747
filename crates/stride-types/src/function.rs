//! Function registry and dispatch types for Stride.
//!
//! `FunctionDefinition` describes what the model may invoke. Arguments
//! arrive as a dynamic JSON map and cross into typed code through
//! `ArgumentMap`'s per-field coercion accessors, which return a typed
//! error instead of ever panicking on a bad cast.

use serde::{Deserialize, Serialize};

use std::fmt;

/// Schema vocabulary for function parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Enumeration { values: Vec<String> },
    Object,
}

/// A single typed parameter in a function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub param_type: ParameterType,
    pub required: bool,
}

/// Static registry entry describing an AI-invocable function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl FunctionDefinition {
    /// Compact one-line rendering for prompt manifests: name plus
    /// description only, never the full schema.
    pub fn manifest_line(&self) -> String {
        format!("- {}: {}", self.name, self.description)
    }
}

/// Errors surfaced by function dispatch.
///
/// These are captured into `FunctionExecutionResult` and shown to the
/// model as structured failures; they are never thrown up the stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionErrorKind {
    #[error("unknown function: '{name}'")]
    UnknownFunction { name: String },

    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

/// Send-safe result payload from a function execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", content = "value")]
pub enum FunctionValue {
    Text(String),
    Json(serde_json::Value),
    Empty,
}

impl FunctionValue {
    /// Render the payload as text the model can consume.
    ///
    /// JSON payloads are flattened into indented `key: value` lines
    /// rather than raw JSON, which models follow more reliably.
    pub fn to_model_text(&self) -> String {
        match self {
            FunctionValue::Text(s) => s.clone(),
            FunctionValue::Json(v) => format_json_value(v, 0),
            FunctionValue::Empty => String::from("(no data)"),
        }
    }
}

fn format_json_value(value: &serde_json::Value, indent: usize) -> String {
    let prefix = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(map) => {
            let mut lines = Vec::with_capacity(map.len());
            for (k, v) in map {
                match v {
                    serde_json::Value::Object(_) => {
                        lines.push(format!("{prefix}{k}:"));
                        lines.push(format_json_value(v, indent + 1));
                    }
                    serde_json::Value::Array(items) => {
                        let rendered: Vec<String> =
                            items.iter().take(5).map(scalar_to_string).collect();
                        lines.push(format!("{prefix}{k}: {}", rendered.join(", ")));
                    }
                    other => lines.push(format!("{prefix}{k}: {}", scalar_to_string(other))),
                }
            }
            lines.join("\n")
        }
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| format_json_value(item, indent))
            .collect::<Vec<_>>()
            .join("\n"),
        other => format!("{prefix}{}", scalar_to_string(other)),
    }
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The outcome of one dispatch call, consumed immediately by the
/// orchestration loop and never persisted beyond logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionExecutionResult {
    pub function_name: String,
    pub success: bool,
    pub payload: FunctionValue,
    pub error: Option<FunctionErrorKind>,
    pub duration_ms: u64,
}

impl FunctionExecutionResult {
    /// A successful result with the given payload.
    pub fn ok(function_name: impl Into<String>, payload: FunctionValue, duration_ms: u64) -> Self {
        Self {
            function_name: function_name.into(),
            success: true,
            payload,
            error: None,
            duration_ms,
        }
    }

    /// A failed result carrying the error kind.
    pub fn failed(
        function_name: impl Into<String>,
        error: FunctionErrorKind,
        duration_ms: u64,
    ) -> Self {
        Self {
            function_name: function_name.into(),
            success: false,
            payload: FunctionValue::Empty,
            error: Some(error),
            duration_ms,
        }
    }

    /// Format this result for the model: payload text on success, a
    /// structured failure line on error so the model can retry or
    /// apologize honestly instead of fabricating data.
    pub fn to_model_text(&self) -> String {
        if self.success {
            self.payload.to_model_text()
        } else {
            let reason = self
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            format!("Function '{}' failed: {reason}", self.function_name)
        }
    }
}

/// Typed view over a dynamic JSON argument map.
///
/// Every accessor performs a safe per-field coercion and returns
/// `InvalidArgument` on type mismatch or missing required field.
#[derive(Debug, Clone, Default)]
pub struct ArgumentMap {
    values: serde_json::Map<String, serde_json::Value>,
}

impl ArgumentMap {
    pub fn new(values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self { values }
    }

    /// Build from any JSON value; non-objects yield an empty map so a
    /// model emitting `null` arguments degrades to "no arguments".
    pub fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self { values: map },
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn missing(field: &str) -> FunctionErrorKind {
        FunctionErrorKind::InvalidArgument {
            field: field.to_string(),
            reason: "required field is missing".to_string(),
        }
    }

    fn mismatch(field: &str, expected: &str, got: &serde_json::Value) -> FunctionErrorKind {
        FunctionErrorKind::InvalidArgument {
            field: field.to_string(),
            reason: format!("expected {expected}, got {}", type_name(got)),
        }
    }

    /// Required string field.
    pub fn require_str(&self, field: &str) -> Result<&str, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Err(Self::missing(field)),
            Some(serde_json::Value::String(s)) => Ok(s),
            Some(other) => Err(Self::mismatch(field, "a string", other)),
        }
    }

    /// Optional string field.
    pub fn optional_str(&self, field: &str) -> Result<Option<&str>, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(Self::mismatch(field, "a string", other)),
        }
    }

    /// Required integer field. Accepts JSON numbers with integral values.
    pub fn require_i64(&self, field: &str) -> Result<i64, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Err(Self::missing(field)),
            Some(value) => coerce_i64(field, value),
        }
    }

    /// Optional integer field.
    pub fn optional_i64(&self, field: &str) -> Result<Option<i64>, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => coerce_i64(field, value).map(Some),
        }
    }

    /// Optional integer field clamped to `[min, max]`, defaulting when absent.
    ///
    /// Out-of-range values clamp rather than fail, matching the original
    /// tool contracts ("days 1-90, default 14").
    pub fn i64_clamped(
        &self,
        field: &str,
        min: i64,
        max: i64,
        default: i64,
    ) -> Result<i64, FunctionErrorKind> {
        Ok(self.optional_i64(field)?.unwrap_or(default).clamp(min, max))
    }

    /// Required floating-point field.
    pub fn require_f64(&self, field: &str) -> Result<f64, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Err(Self::missing(field)),
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| Self::mismatch(field, "a number", &serde_json::Value::Null)),
            Some(other) => Err(Self::mismatch(field, "a number", other)),
        }
    }

    /// Optional boolean field defaulting when absent.
    pub fn bool_or(&self, field: &str, default: bool) -> Result<bool, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Ok(default),
            Some(serde_json::Value::Bool(b)) => Ok(*b),
            Some(other) => Err(Self::mismatch(field, "a boolean", other)),
        }
    }

    /// Required enumeration field: the value must be one of `allowed`.
    pub fn require_enum<'a>(
        &'a self,
        field: &str,
        allowed: &[&str],
    ) -> Result<&'a str, FunctionErrorKind> {
        let value = self.require_str(field)?;
        if allowed.contains(&value) {
            Ok(value)
        } else {
            Err(FunctionErrorKind::InvalidArgument {
                field: field.to_string(),
                reason: format!("must be one of: {}", allowed.join(", ")),
            })
        }
    }

    /// Optional enumeration field.
    pub fn optional_enum<'a>(
        &'a self,
        field: &str,
        allowed: &[&str],
    ) -> Result<Option<&'a str>, FunctionErrorKind> {
        match self.optional_str(field)? {
            None => Ok(None),
            Some(value) if allowed.contains(&value) => Ok(Some(value)),
            Some(_) => Err(FunctionErrorKind::InvalidArgument {
                field: field.to_string(),
                reason: format!("must be one of: {}", allowed.join(", ")),
            }),
        }
    }

    /// Optional nested object field, returned as a nested `ArgumentMap`.
    pub fn optional_object(&self, field: &str) -> Result<Option<ArgumentMap>, FunctionErrorKind> {
        match self.values.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Object(map)) => Ok(Some(ArgumentMap::new(map.clone()))),
            Some(other) => Err(Self::mismatch(field, "an object", other)),
        }
    }

    /// The raw underlying JSON object, for logging.
    pub fn as_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.values.clone())
    }
}

fn coerce_i64(field: &str, value: &serde_json::Value) -> Result<i64, FunctionErrorKind> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                // Models frequently emit integral floats like 14.0
                if f.fract() == 0.0 {
                    Ok(f as i64)
                } else {
                    Err(FunctionErrorKind::InvalidArgument {
                        field: field.to_string(),
                        reason: format!("expected an integer, got {f}"),
                    })
                }
            } else {
                Err(FunctionErrorKind::InvalidArgument {
                    field: field.to_string(),
                    reason: "expected an integer".to_string(),
                })
            }
        }
        other => Err(ArgumentMap::mismatch(field, "an integer", other)),
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl fmt::Display for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_model_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> ArgumentMap {
        ArgumentMap::from_value(value)
    }

    #[test]
    fn test_require_str_present() {
        let map = args(json!({"exercise": "bench press"}));
        assert_eq!(map.require_str("exercise").unwrap(), "bench press");
    }

    #[test]
    fn test_require_str_missing_is_invalid_argument() {
        let map = args(json!({}));
        let err = map.require_str("exercise").unwrap_err();
        assert!(matches!(
            err,
            FunctionErrorKind::InvalidArgument { ref field, .. } if field == "exercise"
        ));
    }

    #[test]
    fn test_require_str_type_mismatch() {
        let map = args(json!({"exercise": 42}));
        let err = map.require_str("exercise").unwrap_err();
        assert!(err.to_string().contains("a number"));
    }

    #[test]
    fn test_i64_clamped_default_and_bounds() {
        let map = args(json!({}));
        assert_eq!(map.i64_clamped("days", 1, 90, 14).unwrap(), 14);

        let map = args(json!({"days": 500}));
        assert_eq!(map.i64_clamped("days", 1, 90, 14).unwrap(), 90);

        let map = args(json!({"days": -3}));
        assert_eq!(map.i64_clamped("days", 1, 90, 14).unwrap(), 1);
    }

    #[test]
    fn test_integral_float_coerces() {
        let map = args(json!({"days": 14.0}));
        assert_eq!(map.require_i64("days").unwrap(), 14);
    }

    #[test]
    fn test_fractional_float_rejected() {
        let map = args(json!({"days": 14.5}));
        assert!(map.require_i64("days").is_err());
    }

    #[test]
    fn test_bool_or_default() {
        let map = args(json!({}));
        assert!(!map.bool_or("include_meals", false).unwrap());
        let map = args(json!({"include_meals": true}));
        assert!(map.bool_or("include_meals", false).unwrap());
    }

    #[test]
    fn test_require_enum() {
        let map = args(json!({"category": "trend"}));
        let allowed = ["correlation", "trend", "anomaly", "milestone", "nudge"];
        assert_eq!(map.require_enum("category", &allowed).unwrap(), "trend");

        let map = args(json!({"category": "bogus"}));
        let err = map.require_enum("category", &allowed).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_null_treated_as_absent() {
        let map = args(json!({"exercise": null}));
        assert!(map.optional_str("exercise").unwrap().is_none());
        assert!(map.require_str("exercise").is_err());
    }

    #[test]
    fn test_non_object_value_degrades_to_empty() {
        let map = ArgumentMap::from_value(json!("not an object"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_nested_object() {
        let map = args(json!({"targets": {"protein": 175}}));
        let nested = map.optional_object("targets").unwrap().unwrap();
        assert_eq!(nested.require_i64("protein").unwrap(), 175);
    }

    #[test]
    fn test_manifest_line() {
        let def = FunctionDefinition {
            name: "query_workouts".to_string(),
            description: "Query workout history".to_string(),
            parameters: vec![],
        };
        assert_eq!(def.manifest_line(), "- query_workouts: Query workout history");
    }

    #[test]
    fn test_result_to_model_text_success() {
        let result = FunctionExecutionResult::ok(
            "query_recovery",
            FunctionValue::Json(json!({"sleep": {"average": 7.2}})),
            42,
        );
        let text = result.to_model_text();
        assert!(text.contains("sleep:"));
        assert!(text.contains("average: 7.2"));
    }

    #[test]
    fn test_result_to_model_text_failure() {
        let result = FunctionExecutionResult::failed(
            "query_workouts",
            FunctionErrorKind::ExecutionFailed {
                reason: "upstream unavailable".to_string(),
            },
            13,
        );
        let text = result.to_model_text();
        assert!(text.contains("query_workouts"));
        assert!(text.contains("upstream unavailable"));
    }

    #[test]
    fn test_json_array_rendering_caps_at_five() {
        let value = FunctionValue::Json(json!({"exercises": ["a", "b", "c", "d", "e", "f"]}));
        let text = value.to_model_text();
        assert!(text.contains("a, b, c, d, e"));
        assert!(!text.contains("f"));
    }

    #[test]
    fn test_error_kind_serde() {
        let err = FunctionErrorKind::UnknownFunction {
            name: "nope".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("unknown_function"));
        let parsed: FunctionErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }
}
