use super::single_input;
use crate::error::TaskError;
use crate::value::TaskResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Multiplies its single input by a constant factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplyTask {
    pub times: Decimal,
}

impl MultiplyTask {
    pub fn run(&self, inputs: &[TaskResult]) -> TaskResult {
        let result = single_input(inputs)
            .and_then(|v| v.to_decimal())
            .and_then(|d| {
                d.checked_mul(self.times)
                    .ok_or_else(|| TaskError::BadInput(format!("{d} * {} overflows", self.times)))
            });
        match result {
            Ok(d) => TaskResult::ok(d),
            Err(e) => TaskResult::err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TaskValue;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_multiply_exact() {
        let task = MultiplyTask { times: dec("1.23") };
        let result = task.run(&[TaskResult::ok(TaskValue::String("5061".into()))]);
        assert_eq!(result.value, Some(TaskValue::Decimal(dec("6225.03"))));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_multiply_wrong_cardinality() {
        let task = MultiplyTask { times: dec("2") };
        let result = task.run(&[]);
        assert!(matches!(
            result.error,
            Some(TaskError::WrongInputCardinality { got: 0, .. })
        ));
    }

    #[test]
    fn test_multiply_upstream_error() {
        let task = MultiplyTask { times: dec("2") };
        let result = task.run(&[TaskResult::err(TaskError::BadInput("boom".into()))]);
        assert!(matches!(result.error, Some(TaskError::UpstreamFailed(_))));
        assert!(result.value.is_none());
    }

    #[test]
    fn test_multiply_non_numeric() {
        let task = MultiplyTask { times: dec("2") };
        let result = task.run(&[TaskResult::ok(TaskValue::Bytes(b"{}".to_vec()))]);
        assert!(matches!(result.error, Some(TaskError::BadInput(_))));
    }
}
