//! Command registry seam used by restoration

use crate::error::CommandError;
use async_trait::async_trait;
use serde_json::Value;

/// Executes named commands with JSON arguments
///
/// Restoration re-runs the command that originally opened an object,
/// passing the arguments persisted for it.
#[async_trait]
pub trait CommandRegistry: Send + Sync {
    /// Execute `command` with `args`
    async fn execute(&self, command: &str, args: &Value) -> Result<Value, CommandError>;
}
