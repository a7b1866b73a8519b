//! Workspace settings store and resolution
//!
//! The store maps workspace roots to fully resolved [`SettingsRecord`]s. It is
//! populated at session start, replaced wholesale on configuration changes and
//! read by every dispatch. Readers always see one complete snapshot: the store is
//! an immutable `Arc<SettingsSnapshot>` that writers swap out under a lock.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::{GlobalSettings, ImportStrategy, NotificationLevel, WorkspaceSettings};
use crate::filters::ExcludeMatcher;
use crate::utils::path_utils::{absolutize, current_dir, path_from_workspace_uri, same_path};

/// Settings that apply to one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRecord {
    /// Absolute, normalized project boundary
    pub workspace_root: PathBuf,
    /// Working directory for the tool
    pub cwd: PathBuf,
    /// Explicit tool executable command line; overrides everything else when set
    pub tool_path: Vec<String>,
    /// Runtime the tool should run under
    pub interpreter_path: Vec<String>,
    /// User-configured arguments
    pub extra_args: Vec<String>,
    pub import_strategy: ImportStrategy,
    pub notification_level: NotificationLevel,
}

/// One consistent view of the store
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    global: GlobalSettings,
    /// `global.exclude`, compiled
    exclude: ExcludeMatcher,
    workspaces: IndexMap<PathBuf, SettingsRecord>,
}

impl SettingsSnapshot {
    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    pub fn exclude(&self) -> &ExcludeMatcher {
        &self.exclude
    }

    /// Workspace records in insertion order
    pub fn workspaces(&self) -> impl Iterator<Item = &SettingsRecord> {
        self.workspaces.values()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.workspaces.keys().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    fn find(&self, dir: &Path) -> Option<&SettingsRecord> {
        self.workspaces
            .get(dir)
            .or_else(|| self.workspaces.values().find(|r| same_path(&r.workspace_root, dir)))
    }
}

/// Owner of the settings store
pub struct SettingsResolver {
    current: RwLock<Arc<SettingsSnapshot>>,
    /// Default interpreter when the editor does not name one
    current_runtime: PathBuf,
}

impl SettingsResolver {
    pub fn new(current_runtime: impl Into<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(SettingsSnapshot::default())),
            current_runtime: current_runtime.into(),
        }
    }

    /// The current store; the returned snapshot never changes underneath the caller
    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Session-start population: set the global defaults, then replace the store.
    pub fn initialize(&self, global: GlobalSettings, settings: Option<Vec<WorkspaceSettings>>) {
        let snapshot = self.build(global, settings.unwrap_or_default());
        self.swap(snapshot);
    }

    /// Replace the whole store from a configuration payload, keeping global defaults.
    ///
    /// Roots missing from `settings` are dropped. An empty payload leaves a single
    /// default record keyed by the current directory.
    pub fn replace(&self, settings: Option<Vec<WorkspaceSettings>>) {
        let global = self.snapshot().global.clone();
        let snapshot = self.build(global, settings.unwrap_or_default());
        self.swap(snapshot);
    }

    /// Find the settings that apply to a document, or to "no document".
    ///
    /// Never fails: anything unmatched degrades to a record synthesized from the
    /// global defaults. The returned record is an independent copy.
    pub fn resolve(&self, document_path: Option<&Path>) -> SettingsRecord {
        self.resolve_in(&self.snapshot(), document_path)
    }

    /// [`resolve`](Self::resolve) against a snapshot the caller already holds
    pub fn resolve_in(&self, snapshot: &SettingsSnapshot, document_path: Option<&Path>) -> SettingsRecord {
        let Some(document_path) = document_path else {
            return match snapshot.workspaces.values().next() {
                Some(record) => record.clone(),
                None => self.record_from_global(&snapshot.global, absolutize(&current_dir())),
            };
        };

        let document_path = absolutize(document_path);
        let parent = document_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| document_path.clone());

        for ancestor in parent.ancestors() {
            if let Some(record) = snapshot.find(ancestor) {
                return record.clone();
            }
        }

        // A lone file outside every workspace
        self.record_from_global(&snapshot.global, parent)
    }

    fn swap(&self, snapshot: SettingsSnapshot) {
        let roots: Vec<String> = snapshot.roots().map(|r| r.display().to_string()).collect();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        log::debug!("Workspace settings replaced: [{}]", roots.join(", "));
    }

    fn build(&self, global: GlobalSettings, settings: Vec<WorkspaceSettings>) -> SettingsSnapshot {
        let mut workspaces = IndexMap::new();

        if settings.is_empty() {
            let root = absolutize(&current_dir());
            workspaces.insert(root.clone(), self.record_from_global(&global, root));
        }

        for entry in settings {
            let Some(root) = path_from_workspace_uri(&entry.workspace) else {
                log::warn!("Skipping settings for non-file workspace '{}'", entry.workspace);
                continue;
            };
            let root = absolutize(&root);
            let mut record = self.record_from_global(&global, root.clone());
            if let Some(path) = entry.path {
                record.tool_path = path;
            }
            if let Some(interpreter) = entry.interpreter {
                record.interpreter_path = interpreter;
            }
            if let Some(args) = entry.args {
                record.extra_args = args;
            }
            if let Some(strategy) = entry.import_strategy {
                record.import_strategy = strategy;
            }
            if let Some(level) = entry.show_notifications {
                record.notification_level = level;
            }
            workspaces.insert(root, record);
        }

        SettingsSnapshot {
            exclude: ExcludeMatcher::new(&global.exclude),
            global,
            workspaces,
        }
    }

    fn record_from_global(&self, global: &GlobalSettings, root: PathBuf) -> SettingsRecord {
        SettingsRecord {
            cwd: root.clone(),
            workspace_root: root,
            tool_path: global.path.clone().unwrap_or_default(),
            interpreter_path: global
                .interpreter
                .clone()
                .unwrap_or_else(|| vec![self.current_runtime.display().to_string()]),
            extra_args: global.args.clone().unwrap_or_default(),
            import_strategy: global.import_strategy.unwrap_or_default(),
            notification_level: global.show_notifications.unwrap_or_default(),
        }
    }
}
