//! Configuration for toolbridge
//!
//! Three layers feed the dispatcher:
//! - `toolbridge.toml`: the tool identity (`[tool]`) and optional global defaults (`[global]`)
//! - process environment: import strategy, notification verbosity, module search path
//! - the editor's initialize / configuration-change payloads

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file looked up in the current directory
pub const DEFAULT_CONFIG_FILE: &str = "toolbridge.toml";

/// Controls where the bundled module directory lands in the module search path
pub const ENV_IMPORT_STRATEGY: &str = "LS_IMPORT_STRATEGY";
/// Controls which messages also raise a user-visible notification
pub const ENV_SHOW_NOTIFICATION: &str = "LS_SHOW_NOTIFICATION";
/// Initial module search path entries, in the platform's path-list syntax
pub const ENV_MODULE_PATH: &str = "LS_MODULE_PATH";

/// Default timeout for a single tool execution
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Whether the bundled module directory is preferred over the environment's
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStrategy {
    #[default]
    #[serde(rename = "useBundled", alias = "bundled")]
    Bundled,
    #[serde(rename = "fromEnvironment")]
    FromEnvironment,
}

impl ImportStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundled => "useBundled",
            Self::FromEnvironment => "fromEnvironment",
        }
    }
}

impl fmt::Display for ImportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "useBundled" | "bundled" => Ok(Self::Bundled),
            "fromEnvironment" => Ok(Self::FromEnvironment),
            other => Err(ConfigError::InvalidValue {
                key: ENV_IMPORT_STRATEGY.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Verbosity of user-visible notifications, from quietest to loudest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    #[default]
    Off,
    OnError,
    OnWarning,
    Always,
}

impl FromStr for NotificationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "onError" => Ok(Self::OnError),
            "onWarning" => Ok(Self::OnWarning),
            "always" => Ok(Self::Always),
            other => Err(ConfigError::InvalidValue {
                key: ENV_SHOW_NOTIFICATION.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Process-wide defaults, sent by the editor as `globalSettings`
///
/// Fields left unset fall back to built-in defaults when a record is synthesized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    pub path: Option<Vec<String>>,
    pub interpreter: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub import_strategy: Option<ImportStrategy>,
    pub show_notifications: Option<NotificationLevel>,
    /// Roots of the runtime's standard library; documents below them are never analyzed
    pub stdlib_paths: Vec<PathBuf>,
    /// Glob patterns for documents that are never analyzed
    pub exclude: Vec<String>,
}

impl GlobalSettings {
    /// Overlay `other` on top of `self`; set fields in `other` win
    pub fn merge(&mut self, other: GlobalSettings) {
        if other.path.is_some() {
            self.path = other.path;
        }
        if other.interpreter.is_some() {
            self.interpreter = other.interpreter;
        }
        if other.args.is_some() {
            self.args = other.args;
        }
        if other.import_strategy.is_some() {
            self.import_strategy = other.import_strategy;
        }
        if other.show_notifications.is_some() {
            self.show_notifications = other.show_notifications;
        }
        if !other.stdlib_paths.is_empty() {
            self.stdlib_paths = other.stdlib_paths;
        }
        if !other.exclude.is_empty() {
            self.exclude = other.exclude;
        }
    }
}

/// One entry of the editor's `settings` list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettings {
    /// Workspace root as a `file:` URI (plain paths are accepted too)
    pub workspace: String,
    #[serde(default)]
    pub path: Option<Vec<String>>,
    #[serde(default)]
    pub interpreter: Option<Vec<String>>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub import_strategy: Option<ImportStrategy>,
    #[serde(default)]
    pub show_notifications: Option<NotificationLevel>,
}

/// Shape of the editor's `initializationOptions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializationOptions {
    pub global_settings: GlobalSettings,
    pub settings: Option<Vec<WorkspaceSettings>>,
}

/// How document text is checked before the tool sees it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntaxCheckKind {
    /// Every document is accepted
    #[default]
    None,
    /// Brackets must balance outside of string literals
    Delimiters,
}

/// Identity of the tool being bridged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ToolSpec {
    /// Module name used for in-process and cross-runtime execution
    pub module: String,
    /// Human readable name used in messages
    pub display_name: String,
    /// Arguments always passed to the tool
    pub args: Vec<String>,
    /// Arguments appended when the document is sent over stdin; `{path}` is replaced
    /// with the document path
    pub stdin_args: Vec<String>,
    /// Whether editor-triggered runs send the document over stdin
    pub use_stdin: bool,
    /// Arguments appended to the interpreter command line to start a runner
    pub runner_args: Vec<String>,
    /// Per-invocation timeout in milliseconds; 0 disables it
    pub timeout_ms: u64,
    pub syntax_check: SyntaxCheckKind,
    /// Directory of modules shipped alongside the tool
    pub bundled_path: Option<PathBuf>,
}

impl Default for ToolSpec {
    fn default() -> Self {
        Self {
            module: "echo".to_string(),
            display_name: "echo".to_string(),
            args: Vec::new(),
            stdin_args: Vec::new(),
            use_stdin: false,
            runner_args: vec!["runner".to_string()],
            timeout_ms: DEFAULT_TIMEOUT_MS,
            syntax_check: SyntaxCheckKind::None,
            bundled_path: None,
        }
    }
}

/// Contents of `toolbridge.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub tool: ToolSpec,
    pub global: GlobalSettings,
}

impl FileConfig {
    /// Load configuration from an explicit path, or from `toolbridge.toml` in the
    /// current directory when it exists. Missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::load_file(default_path)
                } else {
                    log::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            source,
            path: path.display().to_string(),
        })?;
        let config = Self::parse(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Environment-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub import_strategy: ImportStrategy,
    pub show_notifications: NotificationLevel,
    pub module_path: Vec<PathBuf>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. Unparseable values fall back to
    /// defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let import_strategy = lookup(ENV_IMPORT_STRATEGY)
            .and_then(|value| {
                value
                    .parse()
                    .map_err(|e| log::warn!("Ignoring {ENV_IMPORT_STRATEGY}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        let show_notifications = lookup(ENV_SHOW_NOTIFICATION)
            .and_then(|value| {
                value
                    .parse()
                    .map_err(|e| log::warn!("Ignoring {ENV_SHOW_NOTIFICATION}: {e}"))
                    .ok()
            })
            .unwrap_or_default();
        let module_path = lookup(ENV_MODULE_PATH)
            .map(|value| std::env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default();

        Self {
            import_strategy,
            show_notifications,
            module_path,
        }
    }
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file at {path}: {source}")]
    IoError { source: io::Error, path: String },

    /// Failed to parse the configuration content
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// A configuration value is not one of the accepted spellings
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}
