use super::{single_input, string_list};
use crate::error::TaskError;
use crate::value::{TaskResult, TaskValue};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Path of object keys and array indices.
///
/// Decodes from a list of segments or from a string split on `,` (or on
/// `.` when the string has no comma).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct JsonPath(Vec<String>);

impl JsonPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_list(deserializer, &[',', '.']).map(Self)
    }
}

/// Parses its single input as JSON and extracts the value at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonParseTask {
    #[serde(default)]
    pub path: JsonPath,
}

impl JsonParseTask {
    pub fn run(&self, inputs: &[TaskResult]) -> TaskResult {
        let doc = match single_input(inputs).and_then(TaskValue::to_json) {
            Ok(doc) => doc,
            Err(e) => return TaskResult::err(e),
        };
        match self.extract(&doc) {
            Ok(Some(v)) => TaskResult::ok(v),
            Ok(None) => TaskResult::empty(),
            Err(e) => TaskResult::err(e),
        }
    }

    /// Walk the path. A miss on the final segment yields `None`; a miss
    /// anywhere before it is an error.
    pub fn extract(&self, doc: &Value) -> Result<Option<Value>, TaskError> {
        let path = self.path.segments();
        let fail = |message: String| TaskError::PathNotFound {
            path: path.to_vec(),
            message,
        };

        let mut current = doc;
        for (i, segment) in path.iter().enumerate() {
            let last = i + 1 == path.len();
            match current {
                Value::Object(map) => match map.get(segment) {
                    Some(next) => current = next,
                    None if last => return Ok(None),
                    None => return Err(fail(format!("key '{segment}' not found"))),
                },
                Value::Array(items) => {
                    let index: i64 = segment
                        .parse()
                        .map_err(|_| fail(format!("'{segment}' is not an array index")))?;
                    let len = items.len() as i64;
                    let resolved = if index < 0 { len + index } else { index };
                    if resolved < 0 || resolved >= len {
                        if last {
                            return Ok(None);
                        }
                        return Err(fail(format!("index {index} out of range")));
                    }
                    current = &items[resolved as usize];
                }
                other => {
                    return Err(fail(format!(
                        "cannot look up '{segment}' in non-container value {other}"
                    )))
                }
            }
        }
        Ok(Some(current.clone()))
    }
}
