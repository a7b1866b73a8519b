//! Command handlers for the toolbridge CLI.
//!
//! Each subcommand has its own module with a public handler function
//! that `main()` dispatches to.

pub mod run;
pub mod runner;
pub mod server;

use std::path::Path;

use colored::*;

use toolbridge_lib::config::{EnvConfig, FileConfig};
use toolbridge_lib::dispatcher::DispatcherOptions;
use toolbridge_lib::exit_codes::exit;

/// Load `toolbridge.toml` and the environment, exiting with a tool error when
/// the file cannot be used.
pub fn load_options(config: Option<&str>) -> DispatcherOptions {
    if let Some(config_path) = config
        && !Path::new(config_path).exists()
    {
        eprintln!("{}: Configuration file not found: {}", "Error".red().bold(), config_path);
        exit::tool_error();
    }

    let file_config = FileConfig::load(config.map(Path::new)).unwrap_or_else(|e| {
        eprintln!("{}: {}", "Error".red().bold(), e);
        exit::tool_error();
    });
    DispatcherOptions::new(file_config, EnvConfig::from_env())
}
