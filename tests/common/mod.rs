//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use toolbridge_lib::config::{EnvConfig, FileConfig, WorkspaceSettings};
use toolbridge_lib::dispatcher::DispatcherOptions;

/// Stand-in for the running executable, so that naming the real binary as
/// interpreter selects the cross-runtime path
pub const FAKE_RUNTIME: &str = "/opt/toolbridge/bin/toolbridge";

/// The built binary, usable as a runner
pub fn toolbridge_bin() -> String {
    env!("CARGO_BIN_EXE_toolbridge").to_string()
}

pub fn options() -> DispatcherOptions {
    let mut options = DispatcherOptions::new(FileConfig::default(), EnvConfig::default());
    options.current_runtime = PathBuf::from(FAKE_RUNTIME);
    options
}

pub fn workspace(root: &Path) -> WorkspaceSettings {
    WorkspaceSettings {
        workspace: root.display().to_string(),
        ..WorkspaceSettings::default()
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
