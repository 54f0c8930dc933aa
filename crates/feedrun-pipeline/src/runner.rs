//! Pipeline runner: executes a resolved graph and records the run.

use crate::error::PipelineError;
use crate::graph::TaskGraph;
use crate::store::RunStore;
use crate::task::TaskContext;
use crate::value::{TaskResult, TaskValue};
use feedrun_core::{JobId, Run, TaskRun};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes task graphs.
#[derive(Clone)]
pub struct Runner {
    ctx: TaskContext,
    store: Arc<dyn RunStore>,
}

impl Runner {
    pub fn new(ctx: TaskContext, store: Arc<dyn RunStore>) -> Self {
        Self { ctx, store }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Resolve and execute the graph.
    ///
    /// Tasks run one at a time in topological order. A failed task only
    /// affects the tasks that consume it.
    pub async fn execute_run(
        &self,
        job_id: Option<JobId>,
        graph: &TaskGraph,
    ) -> Result<Run, PipelineError> {
        let plan = graph.resolve()?;
        let mut run = Run::new(job_id);
        debug!(run_id = %run.id, tasks = plan.len(), "Starting pipeline run");

        let mut results: Vec<TaskResult> = Vec::with_capacity(plan.len());
        for (index, resolved) in plan.iter().enumerate() {
            let inputs: Vec<TaskResult> = resolved
                .inputs
                .iter()
                .map(|&i| results.get(i).cloned().unwrap_or_default())
                .collect();

            let mut task_run = TaskRun::new(
                run.id.clone(),
                &resolved.dot_id,
                resolved.task.task_type().as_str(),
                index,
            );
            let result = resolved.task.run(&self.ctx, inputs).await;
            if let Some(e) = &result.error {
                debug!(run_id = %run.id, task = %resolved.dot_id, error = %e, "Task errored");
            }
            task_run.finish(
                result.value.as_ref().map(TaskValue::to_output),
                result.error.as_ref().map(ToString::to_string),
            );
            run.task_runs.push(task_run);
            results.push(result);
        }

        let (outputs, errors) = plan
            .iter()
            .zip(&results)
            .filter(|(task, _)| task.is_terminal())
            .map(|(_, result)| {
                (
                    result.value.as_ref().map(TaskValue::to_output),
                    result.error.as_ref().map(ToString::to_string),
                )
            })
            .unzip();
        run.finish(outputs, errors);

        if run.has_errors() {
            warn!(run_id = %run.id, job_id = ?job_id, errors = ?run.errors, "Pipeline run errored");
        } else {
            info!(run_id = %run.id, job_id = ?job_id, "Pipeline run completed");
        }
        Ok(run)
    }

    /// Execute the graph and persist the finished run.
    pub async fn execute_and_insert_finished_run(
        &self,
        job_id: Option<JobId>,
        graph: &TaskGraph,
    ) -> Result<Run, PipelineError> {
        let run = self.execute_run(job_id, graph).await?;
        self.store.insert_finished_run(run.clone()).await?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::StaticBridgeRegistry;
    use crate::error::GraphError;
    use crate::store::MemoryRunStore;
    use crate::transport::{HttpTransport, TransportConfig};
    use axum::{routing::get, Router};
    use feedrun_core::RunStatus;
    use rust_decimal::Decimal;

    async fn serve(body: &'static str) -> std::net::SocketAddr {
        let app = Router::new().route("/", get(move || async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn runner() -> (Runner, Arc<MemoryRunStore>) {
        let transport = HttpTransport::new(TransportConfig {
            allow_unrestricted_network_access: true,
            max_attempts: 1,
            ..TransportConfig::default()
        })
        .unwrap();
        let ctx = TaskContext::new(Arc::new(transport), Arc::new(StaticBridgeRegistry::new()));
        let store = Arc::new(MemoryRunStore::new());
        (Runner::new(ctx, store.clone()), store)
    }

    #[tokio::test]
    async fn test_fetch_parse_median_multiply() {
        let a = serve(r#"{"one":{"two":"6257"}}"#).await;
        let b = serve(r#"{"one":{"two":6194.2}}"#).await;
        let graph = TaskGraph::parse(&format!(
            r#"
            fetch_a [type=http url="http://{a}/"];
            fetch_b [type=http url="http://{b}/"];
            parse_a [type=jsonparse path="one,two"];
            parse_b [type=jsonparse path="one,two"];
            median  [type=median];
            scale   [type=multiply times=100];
            fetch_a -> parse_a -> median;
            fetch_b -> parse_b -> median -> scale;
            "#
        ))
        .unwrap();

        let (runner, store) = runner();
        let run = runner
            .execute_and_insert_finished_run(Some(JobId::new(7)), &graph)
            .await
            .unwrap();

        let decimal = |v: &Option<serde_json::Value>| -> Decimal {
            v.as_ref().unwrap().as_str().unwrap().parse().unwrap()
        };
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.outputs.len(), 1);
        assert_eq!(decimal(&run.outputs[0]), Decimal::from(622560));
        assert_eq!(run.task_runs.len(), 6);
        assert_eq!(
            decimal(&run.task_run("median").unwrap().output),
            "6225.6".parse::<Decimal>().unwrap()
        );
        assert_eq!(store.find_run(&run.id).await.unwrap().job_id, Some(JobId::new(7)));
    }

    #[tokio::test]
    async fn test_failure_does_not_halt_independent_branch() {
        let ok = serve(r#"{"price": "10"}"#).await;
        let graph = TaskGraph::parse(&format!(
            r#"
            good  [type=http url="http://{ok}/"];
            parse [type=jsonparse path="price"];
            bad   [type=multiply times=2];
            good -> parse;
            "#
        ))
        .unwrap();

        let (runner, _) = runner();
        let run = runner.execute_run(None, &graph).await.unwrap();

        assert_eq!(run.status, RunStatus::Errored);
        assert_eq!(run.outputs.len(), 2);
        assert_eq!(run.outputs[0], Some(serde_json::json!("10")));
        assert!(run.errors[0].is_none());
        assert!(run.errors[1]
            .as_deref()
            .unwrap()
            .contains("Wrong number of task inputs"));
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let graph = TaskGraph::parse(
            r#"
            fetch [type=http url="http://127.0.0.1:9/" allowUnrestrictedNetworkAccess=false];
            scale [type=multiply times=2];
            fetch -> scale;
            "#,
        )
        .unwrap();

        let (runner, _) = runner();
        let run = runner.execute_run(None, &graph).await.unwrap();
        assert!(run.task_run("fetch").unwrap().is_errored());
        assert!(run.errors[0].as_deref().unwrap().starts_with("Upstream task failed"));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_execution() {
        let graph = TaskGraph::parse(
            "a [type=multiply times=1]\nb [type=multiply times=1]\na -> b\nb -> a",
        )
        .unwrap();
        let (runner, store) = runner();
        let err = runner
            .execute_and_insert_finished_run(None, &graph)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Graph(GraphError::Cycle(_))));
        assert_eq!(store.len().await, 0);
    }
}
