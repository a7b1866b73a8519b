//! In-process tool modules and the module search path they run against

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;

use crate::config::{EnvConfig, ImportStrategy};

/// A tool entry point callable inside this process
pub trait ToolModule: Send + Sync {
    /// Name the module is registered and invoked under
    fn name(&self) -> &str;

    /// Run the tool. Output goes to `ctx.stdout` / `ctx.stderr`; an `Err` is a
    /// fault in the tool itself.
    fn run(&self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()>;
}

/// Per-call state handed to a [`ToolModule`]
pub struct ModuleContext<'a> {
    /// `argv[0]` is the module name
    pub argv: &'a [String],
    pub cwd: &'a Path,
    pub stdin: Option<&'a str>,
    /// Scoped copy of the module search path; changes do not outlive the call
    pub search_path: &'a mut Vec<PathBuf>,
    pub stdout: String,
    pub stderr: String,
}

impl<'a> ModuleContext<'a> {
    /// Arguments after the module name
    pub fn args(&self) -> &'a [String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Resolve a path argument against the call's working directory
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.cwd.join(path)
    }
}

/// Modules available for in-process execution
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn ToolModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the modules shipped with toolbridge
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(EchoModule);
        registry
    }

    /// Register a module, replacing any module of the same name
    pub fn register(&mut self, module: impl ToolModule + 'static) {
        self.modules.insert(module.name().to_string(), Arc::new(module));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolModule>> {
        self.modules.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Process-wide module search path
///
/// Only one in-process invocation may hold it at a time; see [`ModuleSearchPath::scoped`].
#[derive(Debug, Default)]
pub struct ModuleSearchPath {
    entries: Mutex<Vec<PathBuf>>,
}

impl ModuleSearchPath {
    pub fn new(entries: Vec<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Search path from `LS_MODULE_PATH`, with the bundled directory placed
    /// according to the import strategy.
    pub fn from_env(env: &EnvConfig, bundled: Option<&Path>) -> Self {
        let mut entries = env.module_path.clone();
        if let Some(bundled) = bundled {
            add_bundled_path(&mut entries, bundled, env.import_strategy);
        }
        Self::new(entries)
    }

    /// Copy of the current entries
    pub fn entries(&self) -> Vec<PathBuf> {
        self.lock().clone()
    }

    /// Lock the search path for one call. The guard derefs to the live entries
    /// and puts the saved copy back when dropped, on every exit path.
    pub fn scoped(&self) -> ScopedSearchPath<'_> {
        let guard = self.lock();
        let saved = guard.clone();
        ScopedSearchPath { guard, saved }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Add `path` to `entries` unless present or missing on disk: first under
/// `useBundled`, last under `fromEnvironment`.
pub fn add_bundled_path(entries: &mut Vec<PathBuf>, path: &Path, strategy: ImportStrategy) {
    if entries.iter().any(|p| p == path) || !path.is_dir() {
        return;
    }
    match strategy {
        ImportStrategy::Bundled => entries.insert(0, path.to_path_buf()),
        ImportStrategy::FromEnvironment => entries.push(path.to_path_buf()),
    }
}

/// Exclusive, self-restoring access to the module search path
pub struct ScopedSearchPath<'a> {
    guard: MutexGuard<'a, Vec<PathBuf>>,
    saved: Vec<PathBuf>,
}

impl Deref for ScopedSearchPath<'_> {
    type Target = Vec<PathBuf>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for ScopedSearchPath<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for ScopedSearchPath<'_> {
    fn drop(&mut self) {
        *self.guard = std::mem::take(&mut self.saved);
    }
}

/// Built-in module: copies its input to stdout
///
/// Input is stdin when given, otherwise every non-flag argument read as a file
/// relative to the working directory. Flags are reported on stderr.
pub struct EchoModule;

impl ToolModule for EchoModule {
    fn name(&self) -> &str {
        "echo"
    }

    fn run(&self, ctx: &mut ModuleContext<'_>) -> anyhow::Result<()> {
        let (flags, files): (Vec<&String>, Vec<&String>) = ctx.args().iter().partition(|a| a.starts_with('-'));
        if !flags.is_empty() {
            let flags: Vec<&str> = flags.into_iter().map(String::as_str).collect();
            ctx.stderr.push_str(&format!("flags: {}\n", flags.join(" ")));
        }

        if let Some(stdin) = ctx.stdin {
            ctx.stdout.push_str(stdin);
            return Ok(());
        }

        let mut output = String::new();
        for file in files {
            let path = ctx.resolve(file);
            let content =
                std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            output.push_str(&content);
        }
        ctx.stdout.push_str(&output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn run_echo(argv: &[&str], cwd: &Path, stdin: Option<&str>) -> anyhow::Result<(String, String)> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        let mut search_path = Vec::new();
        let mut ctx = ModuleContext {
            argv: &argv,
            cwd,
            stdin,
            search_path: &mut search_path,
            stdout: String::new(),
            stderr: String::new(),
        };
        EchoModule.run(&mut ctx)?;
        Ok((ctx.stdout, ctx.stderr))
    }

    #[test]
    fn test_echo_stdin() {
        let (stdout, stderr) = run_echo(&["echo", "--check"], Path::new("/"), Some("x = 1\n")).unwrap();
        assert_eq!(stdout, "x = 1\n");
        assert_eq!(stderr, "flags: --check\n");
    }

    #[test]
    fn test_echo_files_relative_to_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.src"), "alpha\n").unwrap();
        let (stdout, stderr) = run_echo(&["echo", "a.src"], dir.path(), None).unwrap();
        assert_eq!(stdout, "alpha\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn test_echo_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_echo(&["echo", "missing.src"], dir.path(), None).unwrap_err();
        assert!(err.to_string().contains("missing.src"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ModuleRegistry::with_builtins();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo"]);
    }

    #[test]
    fn test_scoped_search_path_restores() {
        let search_path = ModuleSearchPath::new(vec![PathBuf::from("/lib/a")]);
        {
            let mut scoped = search_path.scoped();
            scoped.push(PathBuf::from("/lib/leak"));
            scoped.retain(|p| p != Path::new("/lib/a"));
            assert_eq!(*scoped, vec![PathBuf::from("/lib/leak")]);
        }
        assert_eq!(search_path.entries(), vec![PathBuf::from("/lib/a")]);
    }

    #[test]
    fn test_scoped_search_path_restores_on_panic() {
        let search_path = ModuleSearchPath::new(vec![PathBuf::from("/lib/a")]);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut scoped = search_path.scoped();
            scoped.clear();
            panic!("tool blew up");
        }));
        assert!(result.is_err());
        assert_eq!(search_path.entries(), vec![PathBuf::from("/lib/a")]);
    }

    #[test]
    fn test_add_bundled_path_strategy() {
        let bundled = tempfile::tempdir().unwrap();
        let existing = PathBuf::from("/site");

        let mut entries = vec![existing.clone()];
        add_bundled_path(&mut entries, bundled.path(), ImportStrategy::Bundled);
        assert_eq!(entries, vec![bundled.path().to_path_buf(), existing.clone()]);

        // Already present: no duplicate
        add_bundled_path(&mut entries, bundled.path(), ImportStrategy::FromEnvironment);
        assert_eq!(entries.len(), 2);

        let mut entries = vec![existing.clone()];
        add_bundled_path(&mut entries, bundled.path(), ImportStrategy::FromEnvironment);
        assert_eq!(entries, vec![existing, bundled.path().to_path_buf()]);
    }

    #[test]
    fn test_add_bundled_path_skips_missing_dir() {
        let mut entries = Vec::new();
        add_bundled_path(&mut entries, Path::new("/no/such/bundle"), ImportStrategy::Bundled);
        assert!(entries.is_empty());
    }
}
