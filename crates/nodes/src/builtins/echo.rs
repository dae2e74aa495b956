//! `echo` executor — returns its params verbatim. A test fixture, also
//! handy for `workflow-engine validate --dry-run`-style smoke checks.

use async_trait::async_trait;
use serde_json::Value;

use crate::traits::{ExecutionContext, Executor};
use crate::NodeError;

pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn returns_params_unchanged() {
        let ctx = ExecutionContext::new(Uuid::new_v4(), Uuid::new_v4());
        let params = json!({"a": 1, "b": "two"});
        let out = EchoExecutor.execute(params.clone(), &ctx).await.unwrap();
        assert_eq!(out, params);
    }
}
