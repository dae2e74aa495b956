//! `http` executor — issues an HTTP request via `reqwest`.
//!
//! params: `{"method": "GET", "url": "...", "body": <json>, "headers": {..}}`.
//! Result: `{"status_code", "body"}`.

use std::str::FromStr;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};

use crate::traits::{ExecutionContext, Executor};
use crate::NodeError;

pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("http executor requires a string 'url' param".into()))?;

        let method_str = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET");
        let method = Method::from_str(&method_str.to_uppercase())
            .map_err(|e| NodeError::Fatal(format!("invalid HTTP method '{method_str}': {e}")))?;

        let mut request = self.client.request(method, url);

        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }

        if let Some(body) = params.get("body") {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::Retryable(format!("http request failed: {e}")))?;

        let status_code = response.status().as_u16();
        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| Value::String(String::new()));

        Ok(json!({
            "status_code": status_code,
            "body": body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn missing_url_param_is_fatal() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let err = HttpExecutor::new().execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn invalid_method_is_fatal() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let err = HttpExecutor::new()
            .execute(json!({"url": "http://localhost", "method": "FR\u{0}OBNICATE"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
