//! `shell` executor — runs a shell command via `tokio::process::Command`.
//!
//! params: `{"cmd": "echo hi"}`. Result: `{"stdout", "stderr", "returncode"}`.
//! A non-zero exit code is reported in the result rather than as a
//! [`NodeError`] — the DAG author decides success/failure via `condition`
//! on downstream nodes; the executor itself never raises on a non-zero
//! exit.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::traits::{ExecutionContext, Executor};
use crate::NodeError;

pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let cmd = params
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("shell executor requires a string 'cmd' param".into()))?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| NodeError::Retryable(format!("failed to spawn shell: {e}")))?;

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
    async fn runs_command_and_captures_stdout() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let out = ShellExecutor
            .execute(json!({"cmd": "echo hi"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["stdout"], "hi\n");
        assert_eq!(out["returncode"], 0);
    }

    #[tokio::test]
    async fn missing_cmd_param_is_fatal() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let err = ShellExecutor.execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(_)));
    }
}
