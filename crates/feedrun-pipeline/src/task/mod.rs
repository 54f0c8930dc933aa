//! Task variants.
//!
//! Every variant is a plain struct decoded from a node's attributes. The
//! [`Task`] enum is the polymorphic envelope: it serializes as
//! `{"type": "<variant>", ...fields}`.

mod bridge;
mod http;
mod jsonparse;
mod median;
mod multiply;

pub use bridge::BridgeTask;
pub use http::HttpTask;
pub use jsonparse::{JsonParseTask, JsonPath};
pub use median::MedianTask;
pub use multiply::MultiplyTask;

use crate::bridge::BridgeRegistry;
use crate::error::{GraphError, TaskError};
use crate::transport::HttpTransport;
use crate::value::{TaskResult, TaskValue};
use feedrun_core::CoreError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Registry of task type discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Http,
    Bridge,
    Multiply,
    JsonParse,
    Median,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        Self::Http,
        Self::Bridge,
        Self::Multiply,
        Self::JsonParse,
        Self::Median,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Bridge => "bridge",
            Self::Multiply => "multiply",
            Self::JsonParse => "jsonparse",
            Self::Median => "median",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown task type '{s}'")))
    }
}

/// Shared collaborators handed to every task.
#[derive(Clone)]
pub struct TaskContext {
    pub transport: Arc<HttpTransport>,
    pub bridges: Arc<dyn BridgeRegistry>,
}

impl TaskContext {
    pub fn new(transport: Arc<HttpTransport>, bridges: Arc<dyn BridgeRegistry>) -> Self {
        Self { transport, bridges }
    }
}

/// A decoded task, tagged by its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Task {
    Http(HttpTask),
    Bridge(BridgeTask),
    Multiply(MultiplyTask),
    JsonParse(JsonParseTask),
    Median(MedianTask),
}

impl Task {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Http(_) => TaskType::Http,
            Self::Bridge(_) => TaskType::Bridge,
            Self::Multiply(_) => TaskType::Multiply,
            Self::JsonParse(_) => TaskType::JsonParse,
            Self::Median(_) => TaskType::Median,
        }
    }

    /// Decode a `{"type": ..., ...}` envelope for the given node.
    ///
    /// The discriminant is looked up in [`TaskType`] first so an unknown
    /// type is reported as such rather than as a field error.
    pub fn from_value(node: &str, mut value: serde_json::Value) -> Result<Self, GraphError> {
        let raw_type = match value.get("type") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(GraphError::MissingType(node.to_owned())),
        };
        let task_type: TaskType = raw_type.parse().map_err(|_| GraphError::UnknownTaskType {
            node: node.to_owned(),
            task_type: raw_type.clone(),
        })?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".into(), task_type.as_str().into());
        }
        serde_json::from_value(value).map_err(|e| GraphError::InvalidAttributes {
            node: node.to_owned(),
            message: e.to_string(),
        })
    }

    /// Decode a node's graph attributes.
    ///
    /// Values that parse as a JSON object or array are embedded as JSON;
    /// everything else is passed as a string.
    pub fn from_attributes(
        node: &str,
        task_type: TaskType,
        attrs: &BTreeMap<String, String>,
    ) -> Result<Self, GraphError> {
        let mut obj = serde_json::Map::new();
        for (key, raw) in attrs {
            obj.insert(key.clone(), attribute_value(raw));
        }
        obj.insert("type".into(), task_type.as_str().into());
        Self::from_value(node, serde_json::Value::Object(obj))
    }

    /// Execute the task against the results of its inputs.
    pub async fn run(&self, ctx: &TaskContext, inputs: Vec<TaskResult>) -> TaskResult {
        match self {
            Self::Http(t) => t.run(ctx).await,
            Self::Bridge(t) => t.run(ctx).await,
            Self::Multiply(t) => t.run(&inputs),
            Self::JsonParse(t) => t.run(&inputs),
            Self::Median(t) => t.run(inputs).await,
        }
    }
}

fn attribute_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) {
            if v.is_object() || v.is_array() {
                return v;
            }
        }
    }
    serde_json::Value::String(raw.to_owned())
}

/// The single input of a one-input task.
pub(crate) fn single_input(inputs: &[TaskResult]) -> Result<&TaskValue, TaskError> {
    match inputs {
        [only] => {
            if let Some(err) = &only.error {
                return Err(TaskError::UpstreamFailed(err.to_string()));
            }
            only.value
                .as_ref()
                .ok_or_else(|| TaskError::BadInput("upstream task produced no value".into()))
        }
        _ => Err(TaskError::WrongInputCardinality {
            expected: "1".into(),
            got: inputs.len(),
        }),
    }
}

/// Accepts a string or a sequence of strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

pub(crate) fn string_list<'de, D>(deserializer: D, separators: &[char]) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(s) if s.trim().is_empty() => Vec::new(),
        OneOrMany::One(s) => match separators.iter().copied().find(|c| s.contains(*c)) {
            Some(sep) => s.split(sep).map(|p| p.trim().to_owned()).collect(),
            None => vec![s.trim().to_owned()],
        },
    })
}

/// Booleans given as `true`/`false` or as their string spellings.
pub(crate) fn flexible_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        String(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!("invalid boolean '{other}'"))),
        },
    }
}
