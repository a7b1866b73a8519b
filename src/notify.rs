//! User-facing output channel
//!
//! Every message lands in the editor's output log. Errors, warnings and
//! "always" messages additionally pop up as notifications when the configured
//! [`NotificationLevel`] allows it.

use std::sync::{Arc, Mutex, PoisonError};

use colored::Colorize;

use crate::config::NotificationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Log,
}

/// Destination of output-channel traffic
pub trait MessageSink: Send + Sync {
    /// Append to the output log
    fn log_message(&self, level: MessageLevel, message: &str);

    /// Raise a user-visible notification
    fn show_message(&self, level: MessageLevel, message: &str);
}

/// Whether a message of `level` also raises a notification under `setting`
pub fn should_notify(setting: NotificationLevel, level: MessageLevel) -> bool {
    match level {
        MessageLevel::Error => matches!(
            setting,
            NotificationLevel::OnError | NotificationLevel::OnWarning | NotificationLevel::Always
        ),
        MessageLevel::Warning => matches!(setting, NotificationLevel::OnWarning | NotificationLevel::Always),
        MessageLevel::Info => setting == NotificationLevel::Always,
        MessageLevel::Log => false,
    }
}

#[derive(Clone)]
pub struct OutputChannel {
    sink: Arc<dyn MessageSink>,
    notifications: NotificationLevel,
}

impl OutputChannel {
    pub fn new(sink: Arc<dyn MessageSink>, notifications: NotificationLevel) -> Self {
        Self { sink, notifications }
    }

    /// The same channel, notifying at least as often as `level` asks
    pub fn at_least(&self, level: NotificationLevel) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            notifications: self.notifications.max(level),
        }
    }

    pub fn log_to_output(&self, message: &str) {
        self.emit(MessageLevel::Log, message);
    }

    pub fn log_error(&self, message: &str) {
        self.emit(MessageLevel::Error, message);
    }

    pub fn log_warning(&self, message: &str) {
        self.emit(MessageLevel::Warning, message);
    }

    pub fn log_always(&self, message: &str) {
        self.emit(MessageLevel::Info, message);
    }

    fn emit(&self, level: MessageLevel, message: &str) {
        self.sink.log_message(level, message);
        if should_notify(self.notifications, level) {
            self.sink.show_message(level, message);
        }
    }
}

/// Sink for command-line use: the log goes through `log`, notifications to stderr
pub struct LogSink;

impl MessageSink for LogSink {
    fn log_message(&self, level: MessageLevel, message: &str) {
        match level {
            MessageLevel::Error => log::error!("{message}"),
            MessageLevel::Warning => log::warn!("{message}"),
            MessageLevel::Info => log::info!("{message}"),
            MessageLevel::Log => log::debug!("{message}"),
        }
    }

    fn show_message(&self, level: MessageLevel, message: &str) {
        let label = match level {
            MessageLevel::Error => "error".red().bold(),
            MessageLevel::Warning => "warning".yellow().bold(),
            MessageLevel::Info | MessageLevel::Log => "info".cyan().bold(),
        };
        eprintln!("{label}: {message}");
    }
}

/// A message captured by [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub level: MessageLevel,
    pub message: String,
    /// Whether it was raised as a notification rather than only logged
    pub shown: bool,
}

/// Sink that keeps every message, for embedding and tests
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<RecordedMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Logged (not shown) messages of `level`
    pub fn logged(&self, level: MessageLevel) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.level == level && !m.shown)
            .map(|m| m.message)
            .collect()
    }

    fn record(&self, level: MessageLevel, message: &str, shown: bool) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedMessage {
                level,
                message: message.to_string(),
                shown,
            });
    }
}

impl MessageSink for MemorySink {
    fn log_message(&self, level: MessageLevel, message: &str) {
        self.record(level, message, false);
    }

    fn show_message(&self, level: MessageLevel, message: &str) {
        self.record(level, message, true);
    }
}
