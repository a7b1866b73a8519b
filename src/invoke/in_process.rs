//! In-process execution of registered tool modules.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::{ErrorInfo, ErrorKind, InvocationRequest, InvocationResult};
use crate::module::{ModuleContext, ModuleRegistry, ModuleSearchPath};

/// Runs tool modules inside the current process
///
/// Calls are serialized on the module search path: each one gets a scoped copy
/// that is restored afterwards, whatever the module did to it.
pub struct InProcessBackend {
    registry: ModuleRegistry,
    search_path: Arc<ModuleSearchPath>,
}

impl InProcessBackend {
    pub fn new(registry: ModuleRegistry, search_path: Arc<ModuleSearchPath>) -> Self {
        Self { registry, search_path }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn search_path(&self) -> &ModuleSearchPath {
        &self.search_path
    }

    /// Run the module named by `request.argv[0]`.
    ///
    /// Unknown modules, errors returned by the module and panics all come back as
    /// `InProcessException`; the caller decides whether to propagate them.
    pub fn invoke(&self, request: &InvocationRequest) -> Result<InvocationResult, ErrorInfo> {
        let Some(module_name) = request.argv.first() else {
            return Err(ErrorInfo::new(ErrorKind::InProcessException, "Empty argument vector"));
        };
        let Some(module) = self.registry.get(module_name) else {
            return Err(ErrorInfo::new(
                ErrorKind::InProcessException,
                format!("No module named '{module_name}'"),
            ));
        };

        let mut search_path = self.search_path.scoped();
        let mut ctx = ModuleContext {
            argv: &request.argv,
            cwd: &request.working_dir,
            stdin: request.stdin_text(),
            search_path: &mut search_path,
            stdout: String::new(),
            stderr: String::new(),
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| module.run(&mut ctx)));

        match outcome {
            Ok(Ok(())) => Ok(InvocationResult::new(ctx.stdout, ctx.stderr)),
            Ok(Err(err)) => Err(ErrorInfo::new(ErrorKind::InProcessException, format!("{err:#}"))
                .with_cause(format!("{err:?}"))),
            Err(payload) => Err(ErrorInfo::new(
                ErrorKind::InProcessException,
                format!("Module '{module_name}' panicked: {}", panic_message(payload.as_ref())),
            )),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
