//! Error types for graph resolution, transport and task execution.

use feedrun_core::CoreError;
use thiserror::Error;

/// Errors raised while parsing or resolving a task graph.
///
/// All of these are fatal to the job's pipeline: nothing executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Malformed graph source.
    #[error("Syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A node declares a `type` that no task variant handles.
    #[error("Node '{node}' has unknown task type '{task_type}'")]
    UnknownTaskType { node: String, task_type: String },

    /// A node has no `type` attribute (e.g. only referenced by an edge).
    #[error("Node '{0}' has no type")]
    MissingType(String),

    /// A node was declared twice.
    #[error("Node '{0}' declared more than once")]
    DuplicateNode(String),

    /// The attributes do not decode into the node's task variant.
    #[error("Node '{node}' has invalid attributes: {message}")]
    InvalidAttributes { node: String, message: String },

    /// The graph contains a cycle.
    #[error("Task graph contains a cycle through: {0}")]
    Cycle(String),
}

/// Errors raised by the retrying HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request could not be built (bad URL, method, header...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The destination resolves to a restricted address.
    #[error("Access to restricted address '{0}' is not allowed")]
    RestrictedAddress(String),

    /// One attempt exceeded its deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Connection-level failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote server answered 5xx.
    #[error("Remote server error: status {status}: {body}")]
    RemoteServer { status: u16, body: String },

    /// The remote server answered 4xx (or another non-5xx status >= 400).
    #[error("Request failed: status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body exceeded the configured size limit.
    #[error("HTTP response too large, must be less than {limit} bytes")]
    ResponseTooLarge { limit: usize },
}

impl TransportError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RemoteServer { .. }
        )
    }
}

/// Errors produced by a task's `run`.
///
/// `Clone` because one result can feed several downstream tasks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task received a number of inputs its contract does not allow.
    #[error("Wrong number of task inputs: expected {expected}, got {got}")]
    WrongInputCardinality { expected: String, got: usize },

    /// The single upstream input of the task failed.
    #[error("Upstream task failed: {0}")]
    UpstreamFailed(String),

    /// The input could not be interpreted (not a number, not JSON...).
    #[error("Bad input: {0}")]
    BadInput(String),

    /// A JSON path could not be followed.
    #[error("Could not resolve path {path:?}: {message}")]
    PathNotFound { path: Vec<String>, message: String },

    /// The bridge registry has no adapter under this name.
    #[error("Bridge '{0}' not found")]
    BridgeNotFound(String),

    /// Too many median sources failed.
    #[error("Median: {failures} of {total} inputs failed: {}", errors.join("; "))]
    AggregationFailed {
        failures: usize,
        total: usize,
        errors: Vec<String>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors that abort a whole pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// The run store rejected the finished run.
    #[error("Run store error: {0}")]
    Store(#[from] CoreError),
}
