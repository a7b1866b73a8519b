//! Handler for the `server` command.

use colored::*;

use toolbridge_lib::exit_codes::exit;

/// Handle the server command: start the LSP server.
pub fn handle_server(port: Option<u16>, config: Option<String>) {
    let options = super::load_options(config.as_deref());

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("{}: Failed to create Tokio runtime: {}", "Error".red().bold(), e);
        exit::tool_error();
    });

    runtime.block_on(async {
        if let Some(port) = port {
            // TCP mode for debugging
            if let Err(e) = toolbridge_lib::lsp::start_tcp_server(options, port).await {
                eprintln!("Failed to start LSP server on port {port}: {e}");
                exit::tool_error();
            }
        } else if let Err(e) = toolbridge_lib::lsp::start_server(options).await {
            eprintln!("Failed to start LSP server: {e}");
            exit::tool_error();
        }
    });
}
