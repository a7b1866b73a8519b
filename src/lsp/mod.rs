//! Language Server Protocol front end for toolbridge
//!
//! Built into the main binary and started with `toolbridge server`.

pub mod server;
pub mod types;

pub use server::{MAX_WORKERS, ToolbridgeLanguageServer};
pub use types::{RUN_COMMAND, RunCommandResult};

use anyhow::Result;
use tokio::net::TcpListener;
use tower_lsp::{LspService, Server};

use crate::dispatcher::DispatcherOptions;

/// Start the Language Server Protocol server on stdio
/// This is the main entry point for `toolbridge server`
pub async fn start_server(options: DispatcherOptions) -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| ToolbridgeLanguageServer::new(client, options));

    log::info!("Starting toolbridge Language Server Protocol server");

    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

/// Start the LSP server over TCP (useful for debugging)
pub async fn start_tcp_server(options: DispatcherOptions, port: u16) -> Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    log::info!("toolbridge LSP server listening on 127.0.0.1:{port}");

    loop {
        let (stream, peer) = listener.accept().await?;
        log::debug!("Accepted LSP connection from {peer}");
        let options = options.clone();
        let (service, socket) = LspService::new(move |client| ToolbridgeLanguageServer::new(client, options));

        tokio::spawn(async move {
            let (read, write) = tokio::io::split(stream);
            Server::new(read, write, socket).serve(service).await;
        });
    }
}
