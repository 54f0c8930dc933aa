//! feedrun Pipeline
//!
//! Parses task graphs, resolves them into an execution plan, and runs the
//! plan's tasks:
//! - `http` / `bridge`: fetch over the retrying, sandboxed HTTP transport
//! - `jsonparse`: extract a value from a JSON document
//! - `multiply`: scale a number by a constant
//! - `median`: aggregate several numeric inputs
//!
//! Finished runs are persisted through the [`RunStore`] port.

pub mod backoff;
pub mod bridge;
pub mod error;
pub mod graph;
pub mod runner;
pub mod store;
pub mod task;
pub mod transport;
pub mod value;

pub use backoff::Backoff;
pub use bridge::{BridgeRegistry, StaticBridgeRegistry};
pub use error::{GraphError, PipelineError, TaskError, TransportError};
pub use graph::{GraphNode, ResolvedTask, TaskGraph};
pub use runner::Runner;
pub use store::{MemoryRunStore, RunStore};
pub use task::{Task, TaskContext, TaskType};
pub use transport::{HttpRequest, HttpTransport, TransportConfig};
pub use value::{TaskResult, TaskValue};
