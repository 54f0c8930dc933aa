//! Values passed between tasks and the result of one task execution.

use crate::error::TaskError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// A value produced by a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskValue {
    /// Raw response body.
    Bytes(Vec<u8>),
    String(String),
    Decimal(Decimal),
    Json(serde_json::Value),
}

impl TaskValue {
    /// Interpret the value as an exact decimal.
    pub fn to_decimal(&self) -> Result<Decimal, TaskError> {
        match self {
            Self::Decimal(d) => Ok(*d),
            Self::String(s) => parse_decimal(s),
            Self::Bytes(b) => {
                let s = std::str::from_utf8(b)
                    .map_err(|e| TaskError::BadInput(format!("input is not utf-8: {e}")))?;
                parse_decimal(s.trim().trim_matches('"'))
            }
            Self::Json(serde_json::Value::Number(n)) => parse_decimal(&n.to_string()),
            Self::Json(serde_json::Value::String(s)) => parse_decimal(s),
            Self::Json(other) => Err(TaskError::BadInput(format!(
                "cannot convert {other} to a decimal"
            ))),
        }
    }

    /// Parse the value as JSON. Strings and bytes are decoded; decimals
    /// become JSON strings so no precision is lost.
    pub fn to_json(&self) -> Result<serde_json::Value, TaskError> {
        match self {
            Self::Json(v) => Ok(v.clone()),
            Self::Bytes(b) => serde_json::from_slice(b)
                .map_err(|e| TaskError::BadInput(format!("invalid JSON: {e}"))),
            Self::String(s) => serde_json::from_str(s)
                .map_err(|e| TaskError::BadInput(format!("invalid JSON: {e}"))),
            Self::Decimal(d) => Ok(serde_json::Value::String(d.to_string())),
        }
    }

    /// Representation stored on a TaskRun.
    pub fn to_output(&self) -> serde_json::Value {
        match self {
            Self::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Decimal(d) => serde_json::Value::String(d.to_string()),
            Self::Json(v) => v.clone(),
        }
    }
}

impl From<Decimal> for TaskValue {
    fn from(d: Decimal) -> Self {
        Self::Decimal(d)
    }
}

impl From<serde_json::Value> for TaskValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, TaskError> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|_| TaskError::BadInput(format!("'{s}' is not a decimal number")))
}

/// Outcome of one task: a value, an error, or neither.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskResult {
    pub value: Option<TaskValue>,
    pub error: Option<TaskError>,
}

impl TaskResult {
    pub fn ok(value: impl Into<TaskValue>) -> Self {
        Self {
            value: Some(value.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<TaskError>) -> Self {
        Self {
            value: None,
            error: Some(error.into()),
        }
    }

    /// No value and no error.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

impl From<Result<TaskValue, TaskError>> for TaskResult {
    fn from(result: Result<TaskValue, TaskError>) -> Self {
        match result {
            Ok(v) => Self::ok(v),
            Err(e) => Self::err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    #[test]
    fn test_to_decimal_from_bytes() {
        let v = TaskValue::Bytes(b" 6257\n".to_vec());
        assert_eq!(v.to_decimal().unwrap(), dec("6257"));

        let quoted = TaskValue::Bytes(b"\"6194.2\"".to_vec());
        assert_eq!(quoted.to_decimal().unwrap(), dec("6194.2"));
    }

    #[test]
    fn test_to_decimal_from_json() {
        let n = TaskValue::Json(serde_json::json!(1.5));
        assert_eq!(n.to_decimal().unwrap(), dec("1.5"));

        let s = TaskValue::Json(serde_json::json!("42"));
        assert_eq!(s.to_decimal().unwrap(), dec("42"));

        let obj = TaskValue::Json(serde_json::json!({"a": 1}));
        assert!(obj.to_decimal().is_err());
    }

    #[test]
    fn test_to_decimal_scientific() {
        let v = TaskValue::String("1e3".into());
        assert_eq!(v.to_decimal().unwrap(), dec("1000"));
    }

    #[test]
    fn test_to_decimal_rejects_garbage() {
        let err = TaskValue::String("abc".into()).to_decimal().unwrap_err();
        assert!(matches!(err, TaskError::BadInput(_)));
    }

    #[test]
    fn test_output_keeps_decimal_exact() {
        let v = TaskValue::Decimal(dec("6225.03"));
        assert_eq!(v.to_output(), serde_json::json!("6225.03"));
    }
}
