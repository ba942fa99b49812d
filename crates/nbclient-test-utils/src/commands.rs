//! Recording command registry

use async_trait::async_trait;
use nbclient_statedb::{CommandError, CommandRegistry};
use parking_lot::Mutex;
use serde_json::Value;

/// [`CommandRegistry`] that records calls
///
/// Every call succeeds and echoes its args, except calls whose args were
/// marked with [`RecordingCommands::fail_for`].
#[derive(Debug, Default)]
pub struct RecordingCommands {
    calls: Mutex<Vec<(String, Value)>>,
    failing: Mutex<Vec<Value>>,
}

impl RecordingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every future call with these args
    pub fn fail_for(&self, args: Value) {
        self.failing.lock().push(args);
    }

    /// Calls received so far, in arrival order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CommandRegistry for RecordingCommands {
    async fn execute(&self, command: &str, args: &Value) -> Result<Value, CommandError> {
        self.calls.lock().push((command.to_string(), args.clone()));
        if self.failing.lock().contains(args) {
            return Err(CommandError::failed(command, "rejected by test"));
        }
        Ok(args.clone())
    }
}
