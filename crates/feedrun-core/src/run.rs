//! Pipeline Run and TaskRun records.

use crate::{JobId, RunId, RunStatus, TaskRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output and error of one task inside a Run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Unique task run identifier.
    pub id: TaskRunId,

    /// Run this task execution belongs to.
    pub run_id: RunId,

    /// Node id of the task in the graph source.
    pub dot_id: String,

    /// Task variant discriminant (e.g. "http").
    pub task_type: String,

    /// Position of the task in the resolved execution order.
    pub index: usize,

    /// Output value, if any.
    pub output: Option<serde_json::Value>,

    /// Error message, if the task failed.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// Create a TaskRun that is about to execute.
    pub fn new(
        run_id: RunId,
        dot_id: impl Into<String>,
        task_type: impl Into<String>,
        index: usize,
    ) -> Self {
        Self {
            id: TaskRunId::generate(),
            run_id,
            dot_id: dot_id.into(),
            task_type: task_type.into(),
            index,
            output: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Mark the task run as finished with its result.
    pub fn finish(&mut self, output: Option<serde_json::Value>, error: Option<String>) {
        self.output = output;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

/// Durable record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique run identifier.
    pub id: RunId,

    /// Job the run belongs to (ad-hoc runs have none).
    pub job_id: Option<JobId>,

    /// Current run status.
    pub status: RunStatus,

    /// Outputs of the terminal tasks, in execution order.
    pub outputs: Vec<Option<serde_json::Value>>,

    /// Errors of the terminal tasks, aligned with `outputs`.
    pub errors: Vec<Option<String>>,

    /// One record per executed task.
    pub task_runs: Vec<TaskRun>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new running Run.
    pub fn new(job_id: Option<JobId>) -> Self {
        Self {
            id: RunId::generate(),
            job_id,
            status: RunStatus::Running,
            outputs: Vec::new(),
            errors: Vec::new(),
            task_runs: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Close the run with the results of its terminal tasks.
    pub fn finish(
        &mut self,
        outputs: Vec<Option<serde_json::Value>>,
        errors: Vec<Option<String>>,
    ) {
        self.status = if errors.iter().any(Option::is_some) {
            RunStatus::Errored
        } else {
            RunStatus::Completed
        };
        self.outputs = outputs;
        self.errors = errors;
        self.finished_at = Some(Utc::now());
    }

    pub fn has_errors(&self) -> bool {
        self.status == RunStatus::Errored
    }

    /// Look up the task run of a graph node.
    pub fn task_run(&self, dot_id: &str) -> Option<&TaskRun> {
        self.task_runs.iter().find(|tr| tr.dot_id == dot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_finish_completed() {
        let mut run = Run::new(Some(JobId::new(1)));
        run.finish(vec![Some(serde_json::json!("1"))], vec![None]);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_run_finish_errored() {
        let mut run = Run::new(None);
        run.finish(vec![None, Some(serde_json::json!(2))], vec![Some("boom".into()), None]);
        assert!(run.has_errors());
    }

    #[test]
    fn test_task_run_lookup() {
        let mut run = Run::new(None);
        let mut tr = TaskRun::new(run.id.clone(), "fetch", "http", 0);
        tr.finish(None, Some("timeout".into()));
        run.task_runs.push(tr);
        assert!(run.task_run("fetch").unwrap().is_errored());
        assert!(run.task_run("parse").is_none());
    }
}
