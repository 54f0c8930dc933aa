use super::{flexible_bool, string_list, TaskContext};
use crate::error::TransportError;
use crate::transport::HttpRequest;
use crate::value::{TaskResult, TaskValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

fn default_method() -> String {
    "GET".to_owned()
}

fn path_segments<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    string_list(deserializer, &['/'])
}

/// Fetches a URL and returns the raw response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpTask {
    #[serde(default = "default_method")]
    pub method: String,

    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub query_params: BTreeMap<String, String>,

    /// Segments appended to the URL path.
    #[serde(default, deserialize_with = "path_segments")]
    pub extended_path: Vec<String>,

    /// JSON request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<serde_json::Value>,

    /// Overrides the transport's network sandbox for this task.
    #[serde(
        default,
        deserialize_with = "flexible_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub allow_unrestricted_network_access: Option<bool>,
}

impl HttpTask {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            extended_path: Vec::new(),
            request_data: None,
            allow_unrestricted_network_access: None,
        }
    }

    pub fn with_request_data(mut self, data: serde_json::Value) -> Self {
        self.request_data = Some(data);
        self
    }

    pub fn with_unrestricted_network_access(mut self, allow: bool) -> Self {
        self.allow_unrestricted_network_access = Some(allow);
        self
    }

    pub async fn run(&self, ctx: &TaskContext) -> TaskResult {
        let request = match self.build_request() {
            Ok(r) => r,
            Err(e) => return TaskResult::err(e),
        };
        debug!(method = %request.method, url = %request.url, "Sending HTTP task request");
        match ctx.transport.send(&request).await {
            Ok(body) => TaskResult::ok(TaskValue::Bytes(body)),
            Err(e) => TaskResult::err(e),
        }
    }

    pub fn build_request(&self) -> Result<HttpRequest, TransportError> {
        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("bad method '{}'", self.method)))?;

        let mut url = Url::parse(&self.url)
            .map_err(|e| TransportError::InvalidRequest(format!("bad url '{}': {e}", self.url)))?;
        if !self.extended_path.is_empty() {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TransportError::InvalidRequest(format!("url '{}' cannot have a path", self.url))
            })?;
            segments.pop_if_empty();
            segments.extend(self.extended_path.iter().filter(|s| !s.is_empty()));
        }
        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query_params {
                pairs.append_pair(k, v);
            }
        }

        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let body = match &self.request_data {
            Some(data) => {
                if !headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
                {
                    headers.push(("Content-Type".into(), "application/json".into()));
                }
                let bytes = serde_json::to_vec(data)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                Some(bytes)
            }
            None => None,
        };

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
            allow_unrestricted_network_access: self.allow_unrestricted_network_access,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::StaticBridgeRegistry;
    use crate::transport::{HttpTransport, TransportConfig};
    use axum::{extract::Query, routing::post, Json, Router};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_build_request_url() {
        let mut task = HttpTask::new("get", "https://example.com/api/");
        task.extended_path = vec!["v1".into(), "price".into()];
        task.query_params.insert("pair".into(), "ETH/USD".into());
        let req = task.build_request().unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(
            req.url.as_str(),
            "https://example.com/api/v1/price?pair=ETH%2FUSD"
        );
        assert!(req.body.is_none());
    }

    #[test]
    fn test_build_request_json_body() {
        let task = HttpTask::new("POST", "https://example.com")
            .with_request_data(serde_json::json!({"a": 1}));
        let req = task.build_request().unwrap();
        assert_eq!(req.body.as_deref(), Some(br#"{"a":1}"#.as_slice()));
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
    }

    #[test]
    fn test_build_request_rejects_bad_url() {
        let err = HttpTask::new("GET", "not a url").build_request().unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_http_task_round_trip() {
        let app = Router::new().route(
            "/echo",
            post(
                |Query(q): Query<HashMap<String, String>>, Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({"q": q.get("k"), "body": body}))
                },
            ),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let transport = HttpTransport::new(TransportConfig {
            allow_unrestricted_network_access: true,
            ..TransportConfig::default()
        })
        .unwrap();
        let ctx = TaskContext::new(Arc::new(transport), Arc::new(StaticBridgeRegistry::new()));

        let mut task = HttpTask::new("POST", format!("http://{addr}/echo"))
            .with_request_data(serde_json::json!({"x": 1}));
        task.query_params.insert("k".into(), "v".into());
        let result = task.run(&ctx).await;

        assert!(result.error.is_none(), "{:?}", result.error);
        let json = result.value.unwrap().to_json().unwrap();
        assert_eq!(json, serde_json::json!({"q": "v", "body": {"x": 1}}));
    }
}
