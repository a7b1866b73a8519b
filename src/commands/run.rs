//! Handlers for the `run` and `check` commands.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use colored::*;

use toolbridge_lib::dispatcher::{DispatchError, Dispatcher, Document};
use toolbridge_lib::exit_codes::exit;
use toolbridge_lib::invoke::InvocationResult;
use toolbridge_lib::notify::LogSink;
use toolbridge_lib::utils::path_utils::absolutize;

/// Run the tool once without a document.
pub fn handle_run(args: Vec<String>, config: Option<String>) {
    let dispatcher = super::load_options(config.as_deref()).build(Arc::new(LogSink));
    let outcome = dispatcher.run_global(&args).map(Some);
    finish(&dispatcher, outcome);
}

/// Run the tool on a file, as the editor would on open or save.
pub fn handle_check(file: &Path, stdin: bool, args: Vec<String>, config: Option<String>) {
    let source = fs::read_to_string(file).unwrap_or_else(|e| {
        eprintln!("{}: Failed to read {}: {}", "Error".red().bold(), file.display(), e);
        exit::tool_error();
    });

    let dispatcher = super::load_options(config.as_deref()).build(Arc::new(LogSink));
    let document = Document::from_path(absolutize(file), source);
    let outcome = dispatcher.run_for_document(&document, stdin, &args);
    if matches!(outcome, Ok(None)) {
        eprintln!("Skipped {}", file.display());
    }
    finish(&dispatcher, outcome);
}

fn finish(dispatcher: &Dispatcher, outcome: Result<Option<InvocationResult>, DispatchError>) -> ! {
    // process::exit skips destructors
    dispatcher.shutdown();

    match outcome {
        Ok(None) => exit::success(),
        Ok(Some(result)) => {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            if let Some(failure) = &result.failure {
                eprintln!("{}: {}", "Error".red().bold(), failure);
                exit::invocation_failed();
            }
            if result.exit_code.is_some_and(|code| code != 0) {
                exit::invocation_failed();
            }
            exit::success();
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            if let Some(cause) = &e.info().cause {
                eprintln!("{cause}");
            }
            exit::tool_error();
        }
    }
}
