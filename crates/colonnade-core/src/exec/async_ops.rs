//! Async wrappers for blocking query execution.
//!
//! `Executor::execute` blocks until every stage completes. These wrappers
//! run it on Tokio's blocking thread pool so async callers do not stall the
//! runtime.
//!
//! # Usage
//!
//! ```rust,ignore
//! use colonnade_core::exec::async_ops;
//!
//! async fn run(executor: Executor, plan: Plan) -> Result<QueryResult> {
//!     async_ops::execute_async(executor, plan).await
//! }
//! ```

use super::{Executor, QueryResult};
use crate::error::{Error, Result};
use crate::plan::Plan;

/// Executes `plan` on the blocking pool.
///
/// # Errors
///
/// Returns the execution error, or `Internal` if the blocking task panics
/// or is cancelled.
pub async fn execute_async(executor: Executor, plan: Plan) -> Result<QueryResult> {
    tokio::task::spawn_blocking(move || executor.execute(&plan))
        .await
        .map_err(|e| Error::Internal(format!("Task join error: {e}")))?
}
