//! Tool invocation backends
//!
//! Every backend takes an [`InvocationRequest`] and produces one
//! [`InvocationResult`]:
//!
//! - [`direct`]: spawn an executable as a child process
//! - [`rpc`]: forward the call to a runner in another runtime over JSON-RPC
//! - [`in_process`]: call a registered [`ToolModule`](crate::module::ToolModule)
//!
//! Failures are classified with [`ErrorKind`] so callers can tell a missing
//! executable from a broken channel or a faulting module.

pub mod direct;
pub mod in_process;
pub mod rpc;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

pub use direct::DirectPathBackend;
pub use in_process::InProcessBackend;
pub use rpc::{RpcBackend, RpcTarget};

/// Everything a backend needs to run the tool once
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    /// Full argument vector; `argv[0]` is the executable or module name
    pub argv: Vec<String>,
    /// Whether `source_text` is delivered on standard input
    pub use_stdin: bool,
    pub working_dir: PathBuf,
    pub source_text: Option<String>,
}

impl InvocationRequest {
    /// Text to feed the tool's standard input, if any
    pub fn stdin_text(&self) -> Option<&str> {
        if self.use_stdin {
            Some(self.source_text.as_deref().unwrap_or_default())
        } else {
            None
        }
    }

    /// The command line as a single string, for logging
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Outcome of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResult {
    pub stdout: String,
    pub stderr: String,
    pub failure: Option<ErrorInfo>,
    /// Exit status of a spawned executable
    pub exit_code: Option<i32>,
}

impl InvocationResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            failure: None,
            exit_code: None,
        }
    }

    /// A result that ran but produced nothing usable
    pub fn failed(failure: ErrorInfo) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Classification of invocation failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The executable could not be located or launched
    ExecutableNotFound,
    /// The channel to a runner broke, timed out or spoke nonsense
    RpcTransportError,
    /// The tool's entry point raised
    InProcessException,
    /// A launched child had to be killed or its pipes failed
    ProcessFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExecutableNotFound => "executable not found",
            Self::RpcTransportError => "RPC transport error",
            Self::InProcessException => "tool raised an exception",
            Self::ProcessFailed => "process failed",
        })
    }
}

/// A classified invocation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Rendered underlying error or remote trace
    pub cause: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Message plus cause, for the output channel
    pub fn report(&self) -> String {
        match &self.cause {
            Some(cause) => format!("{self}\n{cause}"),
            None => self.to_string(),
        }
    }
}
