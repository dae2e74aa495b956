//! Built-in executor implementations plus the compile-time registration
//! table that stands in for runtime directory-scan plugin discovery.

pub mod echo;
pub mod http;
pub mod script;
pub mod shell;
pub mod sql;

use std::sync::Arc;

use db::DbPool;

use crate::registry::{ExecutorRegistry, RegistryError};

/// Build the registry of built-in executors: `echo`, `shell`, `http`,
/// `sql`, `script`. Does not freeze the registry — callers that need to
/// `register` further executors (the `worker` CLI subcommand's extension
/// point) must do so before calling [`ExecutorRegistry::freeze`].
pub fn builtins(sql_pool: DbPool) -> Result<ExecutorRegistry, RegistryError> {
    let mut registry = ExecutorRegistry::new();
    registry.register("echo", Arc::new(echo::EchoExecutor))?;
    registry.register("shell", Arc::new(shell::ShellExecutor))?;
    registry.register("http", Arc::new(http::HttpExecutor::new()))?;
    registry.register("script", Arc::new(script::ScriptExecutor))?;
    registry.register("sql", Arc::new(sql::SqlExecutor::new(sql_pool)))?;
    Ok(registry)
}
