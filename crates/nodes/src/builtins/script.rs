//! `script` executor — runs a local script file by path.
//!
//! params: `{"path": "/opt/scripts/check.sh", "args": ["--flag"]}`.
//! Result shape matches the `shell` executor: `{"stdout", "stderr",
//! "returncode"}`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::traits::{ExecutionContext, Executor};
use crate::NodeError;

pub struct ScriptExecutor;

#[async_trait]
impl Executor for ScriptExecutor {
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let path = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("script executor requires a string 'path' param".into()))?;

        let args: Vec<&str> = params
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let output = Command::new(path)
            .args(&args)
            .output()
            .await
            .map_err(|e| NodeError::Retryable(format!("failed to run script '{path}': {e}")))?;

        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "returncode": output.status.code().unwrap_or(-1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn missing_path_param_is_fatal() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let err = ScriptExecutor.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }

    #[tokio::test]
    async fn missing_script_file_is_retryable() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let err = ScriptExecutor
            .execute(json!({"path": "/nonexistent/script.sh"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Retryable(_)));
    }
}
