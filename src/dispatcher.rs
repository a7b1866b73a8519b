//! Dispatch of tool runs
//!
//! The dispatcher is the entry point for every run: it filters out documents the
//! tool should never see, resolves settings, picks a [`Strategy`], builds the
//! argument vector and hands the request to exactly one backend.
//!
//! Failures are not treated alike. A broken RPC channel or a fault in a remote
//! module is logged and comes back as an empty result, while a fault in an
//! in-process module is logged and returned as [`DispatchError::InProcess`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{EnvConfig, FileConfig, GlobalSettings, ToolSpec};
use crate::filters::{SkipReason, SyntaxCheck, is_notebook_cell, is_stdlib_file, syntax_check_for};
use crate::invoke::{
    DirectPathBackend, ErrorInfo, InProcessBackend, InvocationRequest, InvocationResult, RpcBackend, RpcTarget,
};
use crate::module::{ModuleRegistry, ModuleSearchPath};
use crate::notify::{MessageSink, OutputChannel};
use crate::settings::{SettingsRecord, SettingsResolver};
use crate::strategy::{self, Strategy};
use crate::utils::path_utils::{absolutize, uri_from_path};

/// Placeholder in `stdin-args` replaced with the document path
pub const PATH_PLACEHOLDER: &str = "{path}";

/// A document as the editor presents it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub uri: String,
    /// Filesystem path, when the document has one
    pub path: Option<PathBuf>,
    /// Current text, possibly unsaved
    pub source: String,
}

impl Document {
    pub fn new(uri: impl Into<String>, path: Option<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            path,
            source: source.into(),
        }
    }

    /// A document backed by a file on disk
    pub fn from_path(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            uri: uri_from_path(&path),
            path: Some(path),
            source: source.into(),
        }
    }

    fn display_name(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.uri.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The in-process module faulted
    #[error(transparent)]
    InProcess(ErrorInfo),
}

impl DispatchError {
    pub fn info(&self) -> &ErrorInfo {
        match self {
            Self::InProcess(info) => info,
        }
    }
}

/// A fully resolved call, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInvocation {
    pub strategy: Strategy,
    pub record: SettingsRecord,
    pub request: InvocationRequest,
}

pub struct Dispatcher {
    tool: ToolSpec,
    settings: SettingsResolver,
    current_runtime: PathBuf,
    direct: DirectPathBackend,
    rpc: RpcBackend,
    in_process: InProcessBackend,
    syntax: Arc<dyn SyntaxCheck>,
    output: OutputChannel,
}

impl Dispatcher {
    /// `current_runtime` should be canonical; see [`current_runtime`].
    pub fn new(tool: ToolSpec, in_process: InProcessBackend, output: OutputChannel, current_runtime: PathBuf) -> Self {
        Self {
            settings: SettingsResolver::new(current_runtime.clone()),
            direct: DirectPathBackend::new(tool.timeout_ms),
            rpc: RpcBackend::new(tool.runner_args.clone(), tool.timeout_ms),
            syntax: syntax_check_for(tool.syntax_check),
            tool,
            current_runtime,
            in_process,
            output,
        }
    }

    /// Replace the syntax check chosen by the tool configuration
    pub fn with_syntax_check(mut self, check: impl SyntaxCheck + 'static) -> Self {
        self.syntax = Arc::new(check);
        self
    }

    pub fn tool(&self) -> &ToolSpec {
        &self.tool
    }

    pub fn settings(&self) -> &SettingsResolver {
        &self.settings
    }

    pub fn output(&self) -> &OutputChannel {
        &self.output
    }

    pub fn in_process(&self) -> &InProcessBackend {
        &self.in_process
    }

    /// Run the tool on one document.
    ///
    /// `Ok(None)` means the document was skipped.
    pub fn run_for_document(
        &self,
        document: &Document,
        use_stdin: bool,
        extra_args: &[String],
    ) -> Result<Option<InvocationResult>, DispatchError> {
        let prepared = match self.prepare_document(document, use_stdin, extra_args) {
            Ok(prepared) => prepared,
            Err(_) => return Ok(None),
        };
        let result = self.execute(&prepared, &document.display_name())?;
        Ok(Some(result))
    }

    /// Run the tool once with no document, e.g. for an editor command
    pub fn run_global(&self, extra_args: &[String]) -> Result<InvocationResult, DispatchError> {
        let prepared = self.prepare_global(extra_args);
        self.execute(&prepared, "")
    }

    /// Filter, resolve and build the call for `document` without running it.
    ///
    /// A document that fails the syntax check logs one warning; the other skip
    /// reasons are silent on the output channel.
    pub fn prepare_document(
        &self,
        document: &Document,
        use_stdin: bool,
        extra_args: &[String],
    ) -> Result<PreparedInvocation, SkipReason> {
        if is_notebook_cell(&document.uri) {
            log::debug!("Skipping notebook cell {}", document.uri);
            return Err(SkipReason::NotebookCell);
        }

        if let Err(problem) = self.syntax.check(&document.source) {
            self.output.log_warning(&format!(
                "Skipping {}: {} could not parse it ({problem})",
                document.display_name(),
                self.tool.display_name
            ));
            return Err(SkipReason::InvalidSource(problem));
        }

        let path = document.path.as_deref().map(absolutize);
        let snapshot = self.settings.snapshot();
        if let Some(path) = &path
            && is_stdlib_file(path, &snapshot.global().stdlib_paths)
        {
            log::debug!("Skipping standard library file {}", path.display());
            return Err(SkipReason::StandardLibrary);
        }

        let record = self.settings.resolve_in(&snapshot, path.as_deref());
        if let Some(path) = &path
            && snapshot.exclude().is_excluded(path, &record.workspace_root)
        {
            log::debug!("Skipping excluded file {}", path.display());
            return Err(SkipReason::Excluded);
        }

        let strategy = strategy::select(&record, &self.current_runtime);
        let mut argv = self.base_argv(strategy, &record, extra_args);
        match (&path, use_stdin) {
            (Some(path), false) => argv.push(path.display().to_string()),
            (None, false) => {}
            (path, true) => {
                let path = path.as_ref().map(|p| p.display().to_string()).unwrap_or_default();
                argv.extend(self.tool.stdin_args.iter().map(|a| a.replace(PATH_PLACEHOLDER, &path)));
            }
        }

        let request = InvocationRequest {
            argv,
            use_stdin,
            working_dir: record.cwd.clone(),
            source_text: Some(document.source.clone()),
        };
        Ok(PreparedInvocation {
            strategy,
            record,
            request,
        })
    }

    /// Resolve and build the document-less call without running it
    pub fn prepare_global(&self, extra_args: &[String]) -> PreparedInvocation {
        let record = self.settings.resolve(None);
        let strategy = strategy::select(&record, &self.current_runtime);
        let request = InvocationRequest {
            argv: self.base_argv(strategy, &record, extra_args),
            use_stdin: true,
            working_dir: record.workspace_root.clone(),
            source_text: None,
        };
        PreparedInvocation {
            strategy,
            record,
            request,
        }
    }

    /// Execute a prepared call on the backend its strategy names
    pub fn execute(&self, prepared: &PreparedInvocation, label: &str) -> Result<InvocationResult, DispatchError> {
        let PreparedInvocation {
            strategy,
            record,
            request,
        } = prepared;
        let output = self.output.at_least(record.notification_level);
        log::debug!("Dispatching {} via {strategy}", request.argv.first().map_or("", String::as_str));

        let result = match strategy {
            Strategy::DirectPath => {
                output.log_to_output(&request.command_line());
                output.log_to_output(&format!("CWD Server: {}", request.working_dir.display()));
                self.direct.invoke(request)
            }
            Strategy::CrossRuntimeRpc => {
                output.log_to_output(&format!(
                    "{} -m {}",
                    record.interpreter_path.join(" "),
                    request.command_line()
                ));
                output.log_to_output(&format!("CWD Server: {}", request.working_dir.display()));
                let target = RpcTarget {
                    workspace: &record.workspace_root,
                    interpreter: &record.interpreter_path,
                    module: &self.tool.module,
                    import_strategy: record.import_strategy,
                };
                self.rpc.invoke(&target, request)
            }
            Strategy::InProcessModule => {
                output.log_to_output(&format!(
                    "{} -m {}",
                    self.current_runtime.display(),
                    request.command_line()
                ));
                output.log_to_output(&format!("CWD Server: {}", request.working_dir.display()));
                match self.in_process.invoke(request) {
                    Ok(result) => result,
                    Err(failure) => {
                        output.log_error(&failure.report());
                        return Err(DispatchError::InProcess(failure));
                    }
                }
            }
        };

        if let Some(failure) = &result.failure {
            output.log_error(&failure.report());
        }
        if !result.stderr.is_empty() {
            output.log_to_output(&result.stderr);
        }
        output.log_to_output(&format!("{label} :\r\n{}", result.stdout));
        Ok(result)
    }

    /// Stop every runner process
    pub fn shutdown(&self) {
        self.rpc.shutdown();
    }

    fn base_argv(&self, strategy: Strategy, record: &SettingsRecord, extra_args: &[String]) -> Vec<String> {
        let mut argv = match strategy {
            Strategy::DirectPath => record.tool_path.clone(),
            Strategy::CrossRuntimeRpc | Strategy::InProcessModule => vec![self.tool.module.clone()],
        };
        argv.extend(self.tool.args.iter().cloned());
        argv.extend(record.extra_args.iter().cloned());
        argv.extend(extra_args.iter().cloned());
        argv
    }
}

/// Everything needed to build a [`Dispatcher`], shareable between sessions
#[derive(Clone)]
pub struct DispatcherOptions {
    pub tool: ToolSpec,
    /// Global defaults from the configuration file
    pub global: GlobalSettings,
    pub env: EnvConfig,
    pub registry: ModuleRegistry,
    pub search_path: Arc<ModuleSearchPath>,
    pub current_runtime: PathBuf,
}

impl DispatcherOptions {
    pub fn new(config: FileConfig, env: EnvConfig) -> Self {
        let search_path = ModuleSearchPath::from_env(&env, config.tool.bundled_path.as_deref());
        Self {
            tool: config.tool,
            global: config.global,
            env,
            registry: ModuleRegistry::with_builtins(),
            search_path: Arc::new(search_path),
            current_runtime: current_runtime(),
        }
    }

    /// A dispatcher reporting to `sink`, its store holding the file defaults
    pub fn build(&self, sink: Arc<dyn MessageSink>) -> Dispatcher {
        let in_process = InProcessBackend::new(self.registry.clone(), Arc::clone(&self.search_path));
        let output = OutputChannel::new(sink, self.env.show_notifications);
        let dispatcher = Dispatcher::new(self.tool.clone(), in_process, output, self.current_runtime.clone());
        dispatcher.settings().initialize(self.global.clone(), None);
        dispatcher
    }
}

/// Canonical path of the running executable
pub fn current_runtime() -> PathBuf {
    match std::env::current_exe() {
        Ok(exe) => exe.canonicalize().unwrap_or(exe),
        Err(e) => {
            log::warn!("Cannot determine the current executable: {e}");
            PathBuf::from(env!("CARGO_PKG_NAME"))
        }
    }
}
