//! toolbridge: run a language tool from an editor session
//!
//! A settings store resolves which configuration applies to a document, a
//! strategy selector decides how the tool runs (an executable on disk, a runner
//! in another runtime over JSON-RPC, or a module inside this process) and the
//! dispatcher ties both to the backends in [`invoke`].

pub mod config;
pub mod dispatcher;
pub mod exit_codes;
pub mod filters;
pub mod invoke;
pub mod jsonrpc;
pub mod lsp;
pub mod module;
pub mod notify;
pub mod runner;
pub mod settings;
pub mod strategy;
pub mod utils;

pub use config::{EnvConfig, FileConfig, GlobalSettings, ImportStrategy, NotificationLevel, ToolSpec, WorkspaceSettings};
pub use dispatcher::{DispatchError, Dispatcher, DispatcherOptions, Document, PreparedInvocation};
pub use invoke::{ErrorInfo, ErrorKind, InvocationRequest, InvocationResult};
pub use module::{ModuleContext, ModuleRegistry, ToolModule};
pub use settings::{SettingsRecord, SettingsResolver};
pub use strategy::Strategy;
