use super::{HttpTask, TaskContext};
use crate::value::TaskResult;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// POSTs to an external adapter looked up by name in the bridge registry.
///
/// The adapter receives `{"id": <uuid>, "data": <requestData>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTask {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<serde_json::Value>,
}

impl BridgeTask {
    pub async fn run(&self, ctx: &TaskContext) -> TaskResult {
        let url = match ctx.bridges.find_bridge(&self.name).await {
            Ok(url) => url,
            Err(e) => return TaskResult::err(e),
        };
        let id = Uuid::new_v4();
        debug!(bridge = %self.name, request_id = %id, "Calling bridge");

        let body = serde_json::json!({
            "id": id.to_string(),
            "data": self.request_data.clone().unwrap_or(serde_json::Value::Null),
        });
        // Bridges are operator-configured, usually on the local network.
        HttpTask::new("POST", url.as_str())
            .with_request_data(body)
            .with_unrestricted_network_access(true)
            .run(ctx)
            .await
    }
}
