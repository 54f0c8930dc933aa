use crate::error::TaskError;
use crate::value::TaskResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Median of its inputs.
///
/// Fails when at least half of the inputs failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MedianTask {}

impl MedianTask {
    pub async fn run(&self, inputs: Vec<TaskResult>) -> TaskResult {
        match median(inputs).await {
            Ok(d) => TaskResult::ok(d),
            Err(e) => TaskResult::err(e),
        }
    }
}

async fn median(inputs: Vec<TaskResult>) -> Result<Decimal, TaskError> {
    let total = inputs.len();
    if total == 0 {
        return Err(TaskError::WrongInputCardinality {
            expected: "at least 1".into(),
            got: 0,
        });
    }

    // Each spawned conversion sends exactly once; capacity `total` never blocks.
    let (tx, mut rx) = mpsc::channel(total);
    for (index, input) in inputs.into_iter().enumerate() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let converted = match (input.error, input.value) {
                (Some(e), _) => Err(e.to_string()),
                (None, Some(v)) => v.to_decimal().map_err(|e| e.to_string()),
                (None, None) => Err("input has no value".to_owned()),
            };
            let _ = tx.send((index, converted)).await;
        });
    }
    drop(tx);

    let mut values = Vec::with_capacity(total);
    let mut errors = Vec::new();
    while let Some((index, converted)) = rx.recv().await {
        match converted {
            Ok(d) => values.push(d),
            Err(e) => errors.push((index, e)),
        }
    }

    // A conversion that never reported counts as failed.
    let failures = total - values.len();
    debug!(total, failures, "Median inputs collected");
    if failures * 2 >= total {
        errors.sort_by_key(|(index, _)| *index);
        return Err(TaskError::AggregationFailed {
            failures,
            total,
            errors: errors.into_iter().map(|(_, e)| e).collect(),
        });
    }

    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Ok(values[mid])
    } else {
        let (low, high) = (values[mid - 1], values[mid]);
        let two = Decimal::from(2);
        // The sum only overflows when both share a sign, and then the
        // difference cannot.
        Ok(match low.checked_add(high) {
            Some(sum) => sum / two,
            None => low + (high - low) / two,
        })
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

    fn ok(s: &str) -> TaskResult {
        TaskResult::ok(TaskValue::String(s.into()))
    }

    fn failed(msg: &str) -> TaskResult {
        TaskResult::err(TaskError::BadInput(msg.into()))
    }

    #[tokio::test]
    async fn test_median_even_count() {
        let result = MedianTask::default().run(vec![ok("6257"), ok("6194.2")]).await;
        assert_eq!(result.value, Some(TaskValue::Decimal(dec("6225.6"))));
    }

    #[tokio::test]
    async fn test_median_even_count_near_limit() {
        let max = Decimal::MAX.to_string();
        let result = MedianTask::default().run(vec![ok(&max), ok(&max)]).await;
        assert_eq!(result.error, None);
        assert_eq!(result.value, Some(TaskValue::Decimal(Decimal::MAX)));

        let min = Decimal::MIN.to_string();
        let result = MedianTask::default().run(vec![ok(&min), ok(&max)]).await;
        assert_eq!(result.value, Some(TaskValue::Decimal(Decimal::ZERO)));

        let result = MedianTask::default().run(vec![ok(&min), ok(&min)]).await;
        assert_eq!(result.value, Some(TaskValue::Decimal(Decimal::MIN)));
    }

    #[tokio::test]
    async fn test_median_odd_count() {
        let result = MedianTask::default().run(vec![ok("3"), ok("1"), ok("2")]).await;
        assert_eq!(result.value, Some(TaskValue::Decimal(dec("2"))));
    }

    #[tokio::test]
    async fn test_median_majority_failed() {
        let inputs = vec![ok("1"), failed("a"), failed("b"), ok("2"), failed("c")];
        let result = MedianTask::default().run(inputs).await;
        match result.error {
            Some(TaskError::AggregationFailed {
                failures,
                total,
                errors,
            }) => {
                assert_eq!((failures, total), (3, 5));
                assert_eq!(errors.len(), 3);
                assert!(errors[0].ends_with(": a") && errors[2].ends_with(": c"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_median_tolerates_minority_failures() {
        let inputs = vec![ok("1"), ok("2"), failed("x"), ok("3"), ok("4")];
        let result = MedianTask::default().run(inputs).await;
        assert_eq!(result.value, Some(TaskValue::Decimal(dec("2.5"))));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_median_half_failed_is_error() {
        let result = MedianTask::default().run(vec![ok("1"), failed("x")]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_median_no_inputs() {
        let result = MedianTask::default().run(vec![]).await;
        assert!(matches!(
            result.error,
            Some(TaskError::WrongInputCardinality { got: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_median_counts_empty_and_unparsable_inputs() {
        let inputs = vec![ok("10"), TaskResult::empty(), ok("abc"), ok("20"), ok("30")];
        let result = MedianTask::default().run(inputs).await;
        assert_eq!(result.value, Some(TaskValue::Decimal(dec("20"))));
    }
}
