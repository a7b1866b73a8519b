//! Language server wrapping the dispatcher
//!
//! Requests are answered on the tower-lsp event loop; tool runs block, so they
//! are moved onto the blocking pool with at most [`MAX_WORKERS`] in flight.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore, mpsc};
use tower_lsp::jsonrpc::{Error as JsonRpcError, Result as JsonRpcResult};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};

use crate::dispatcher::{Dispatcher, DispatcherOptions, Document};
use crate::lsp::types::{RUN_COMMAND, RunCommandResult, initialization_options, message_type, settings_from_change};
use crate::notify::{LogSink, MessageLevel, MessageSink};
use crate::utils::path_utils::current_dir;

/// Tool runs executing at the same time
pub const MAX_WORKERS: usize = 2;

struct ClientMessage {
    level: MessageLevel,
    text: String,
    shown: bool,
}

/// Forwards output-channel traffic to the editor and mirrors the log into `log`
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl ChannelSink {
    fn send(&self, level: MessageLevel, message: &str, shown: bool) {
        // The receiver only goes away with the session
        let _ = self.tx.send(ClientMessage {
            level,
            text: message.to_string(),
            shown,
        });
    }
}

impl MessageSink for ChannelSink {
    fn log_message(&self, level: MessageLevel, message: &str) {
        LogSink.log_message(level, message);
        self.send(level, message, false);
    }

    fn show_message(&self, level: MessageLevel, message: &str) {
        self.send(level, message, true);
    }
}

async fn forward_messages(client: Client, mut rx: mpsc::UnboundedReceiver<ClientMessage>) {
    while let Some(message) = rx.recv().await {
        let kind = message_type(message.level);
        if message.shown {
            client.show_message(kind, message.text).await;
        } else {
            client.log_message(kind, message.text).await;
        }
    }
}

pub struct ToolbridgeLanguageServer {
    client: Client,
    options: DispatcherOptions,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<Semaphore>,
    /// Text of open documents
    documents: Arc<RwLock<HashMap<Url, String>>>,
}

impl ToolbridgeLanguageServer {
    /// Must be called inside a tokio runtime: it starts the task that forwards
    /// messages to the client.
    pub fn new(client: Client, options: DispatcherOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_messages(client.clone(), rx));
        let dispatcher = options.build(Arc::new(ChannelSink { tx }));
        Self {
            client,
            options,
            dispatcher: Arc::new(dispatcher),
            workers: Arc::new(Semaphore::new(MAX_WORKERS)),
            documents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run `job` on the blocking pool once a worker slot is free
    async fn dispatch<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&Dispatcher) -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = Arc::clone(&self.workers).acquire_owned().await?;
        let dispatcher = Arc::clone(&self.dispatcher);
        Ok(tokio::task::spawn_blocking(move || job(&dispatcher)).await?)
    }

    async fn run_on_document(&self, uri: Url, text: String) {
        let document = Document::new(uri.to_string(), uri.to_file_path().ok(), text);
        let use_stdin = self.dispatcher.tool().use_stdin;

        match self.dispatch(move |d| d.run_for_document(&document, use_stdin, &[])).await {
            Ok(Ok(Some(result))) if result.is_success() => log::debug!("Tool finished for {uri}"),
            Ok(Ok(Some(result))) => {
                log::debug!("Tool failed for {uri}: {:?}", result.failure_kind())
            }
            Ok(Ok(None)) => log::debug!("Skipped {uri}"),
            Ok(Err(e)) => log::error!("Tool raised for {uri}: {e}"),
            Err(e) => log::error!("Failed to run tool for {uri}: {e}"),
        }
    }

    fn log_session(&self) {
        let output = self.dispatcher.output();
        let snapshot = self.dispatcher.settings().snapshot();
        let settings: Vec<_> = snapshot.workspaces().collect();

        output.log_to_output(&format!("CWD Server: {}", current_dir().display()));
        output.log_to_output(&format!(
            "Module search path used to run the server: {:?}",
            self.options.search_path.entries()
        ));
        output.log_to_output(&format!(
            "Settings used to run the server: {}",
            serde_json::to_string_pretty(&settings).unwrap_or_default()
        ));
        output.log_to_output(&format!(
            "Global settings: {}",
            serde_json::to_string_pretty(snapshot.global()).unwrap_or_default()
        ));
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for ToolbridgeLanguageServer {
    async fn initialize(&self, params: InitializeParams) -> JsonRpcResult<InitializeResult> {
        log::info!("Initializing toolbridge Language Server");

        let options = initialization_options(params.initialization_options);
        let mut global = self.options.global.clone();
        global.merge(options.global_settings);
        self.dispatcher.settings().initialize(global, options.settings);
        self.log_session();

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(true),
                    })),
                    ..Default::default()
                })),
                execute_command_provider: Some(ExecuteCommandOptions {
                    commands: vec![RUN_COMMAND.to_string()],
                    work_done_progress_options: WorkDoneProgressOptions::default(),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: self.dispatcher.tool().display_name.clone(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("toolbridge Language Server initialized");

        self.client
            .log_message(MessageType::INFO, "toolbridge Language Server started")
            .await;
    }

    async fn shutdown(&self) -> JsonRpcResult<()> {
        log::info!("Shutting down toolbridge Language Server");
        if let Err(e) = self.dispatch(Dispatcher::shutdown).await {
            log::warn!("Failed to stop runners: {e}");
        }
        Ok(())
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        let settings = settings_from_change(params.settings);
        self.dispatcher.settings().replace(settings);
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        self.documents.write().await.insert(uri.clone(), text.clone());
        self.run_on_document(uri, text).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        if let Some(change) = params.content_changes.into_iter().next() {
            self.documents.write().await.insert(params.text_document.uri, change.text);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = match params.text {
            Some(text) => {
                self.documents.write().await.insert(uri.clone(), text.clone());
                Some(text)
            }
            None => self.documents.read().await.get(&uri).cloned(),
        };
        match text {
            Some(text) => self.run_on_document(uri, text).await,
            None => log::debug!("Saved document {uri} was never opened"),
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.documents.write().await.remove(&params.text_document.uri);
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> JsonRpcResult<Option<Value>> {
        if params.command != RUN_COMMAND {
            return Err(JsonRpcError::invalid_params(format!("Unknown command '{}'", params.command)));
        }
        let args: Vec<String> = params
            .arguments
            .iter()
            .filter_map(|arg| arg.as_str().map(str::to_string))
            .collect();

        let outcome = match self.dispatch(move |d| d.run_global(&args)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Failed to run {RUN_COMMAND}: {e}");
                return Err(JsonRpcError::internal_error());
            }
        };
        match outcome {
            Ok(result) => {
                let reply = RunCommandResult {
                    stdout: result.stdout,
                    stderr: result.stderr,
                };
                serde_json::to_value(reply)
                    .map(Some)
                    .map_err(|_| JsonRpcError::internal_error())
            }
            Err(e) => {
                let mut error = JsonRpcError::internal_error();
                error.message = e.to_string().into();
                Err(error)
            }
        }
    }
}
