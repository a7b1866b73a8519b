//! LSP payload shapes and conversions for toolbridge

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_lsp::lsp_types::MessageType;

use crate::config::{InitializationOptions, WorkspaceSettings};
use crate::notify::MessageLevel;

/// Command that runs the tool once without a document
pub const RUN_COMMAND: &str = "toolbridge.run";

/// Reply to [`RUN_COMMAND`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommandResult {
    pub stdout: String,
    pub stderr: String,
}

/// Read `initializationOptions`, falling back to defaults when absent or malformed
pub fn initialization_options(options: Option<Value>) -> InitializationOptions {
    let Some(options) = options else {
        return InitializationOptions::default();
    };
    serde_json::from_value(options).unwrap_or_else(|e| {
        log::warn!("Ignoring malformed initialization options: {e}");
        InitializationOptions::default()
    })
}

/// Workspace settings from a `workspace/didChangeConfiguration` payload.
///
/// Accepts `{"settings": [...]}` as well as a bare array. Anything else is
/// treated as "no settings", which resets the store to the default record.
pub fn settings_from_change(settings: Value) -> Option<Vec<WorkspaceSettings>> {
    let list = match settings {
        Value::Object(mut map) => map.remove("settings")?,
        Value::Array(_) => settings,
        _ => return None,
    };
    if list.is_null() {
        return None;
    }
    serde_json::from_value(list)
        .map_err(|e| log::warn!("Ignoring malformed workspace settings: {e}"))
        .ok()
}

pub fn message_type(level: MessageLevel) -> MessageType {
    match level {
        MessageLevel::Error => MessageType::ERROR,
        MessageLevel::Warning => MessageType::WARNING,
        MessageLevel::Info => MessageType::INFO,
        MessageLevel::Log => MessageType::LOG,
    }
}
