//! Handler for the `runner` command.

use std::io;

use colored::*;

use toolbridge_lib::exit_codes::exit;
use toolbridge_lib::invoke::InProcessBackend;
use toolbridge_lib::runner;

/// Serve `run` requests on stdio until `exit` or end of input.
pub fn handle_runner(config: Option<String>) {
    let options = super::load_options(config.as_deref());
    let backend = InProcessBackend::new(options.registry, options.search_path);

    let stdin = io::stdin();
    let stdout = io::stdout();
    if let Err(e) = runner::serve(stdin.lock(), stdout.lock(), &backend) {
        eprintln!("{}: Runner stopped: {}", "Error".red().bold(), e);
        exit::tool_error();
    }
}
