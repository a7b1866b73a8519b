//! Execution strategy selection
//!
//! The single place that decides how a tool runs. Every backend dispatch in the
//! crate matches on the [`Strategy`] this returns.

use std::fmt;
use std::path::Path;

use crate::settings::SettingsRecord;
use crate::utils::path_utils::same_path;

/// The mutually exclusive ways of running a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Spawn the executable named by the record's tool path
    DirectPath,
    /// Ask a runner living in a different runtime over JSON-RPC
    CrossRuntimeRpc,
    /// Call the tool module inside this process
    InProcessModule,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DirectPath => "direct-path",
            Self::CrossRuntimeRpc => "cross-runtime-rpc",
            Self::InProcessModule => "in-process-module",
        })
    }
}

/// Pick the strategy for `record`. First match wins:
///
/// 1. an explicit tool path
/// 2. an interpreter that is not `current_runtime`
/// 3. in-process
pub fn select(record: &SettingsRecord, current_runtime: &Path) -> Strategy {
    if !record.tool_path.is_empty() {
        return Strategy::DirectPath;
    }

    match record.interpreter_path.first() {
        Some(interpreter) if !is_current_runtime(Path::new(interpreter), current_runtime) => {
            Strategy::CrossRuntimeRpc
        }
        _ => Strategy::InProcessModule,
    }
}

/// Whether `candidate` names the runtime hosting this dispatcher.
pub fn is_current_runtime(candidate: &Path, current_runtime: &Path) -> bool {
    same_path(candidate, current_runtime)
}
