//! Real-time log and batch progress streaming via Server-Sent Events (SSE).
//!
//! Every pipeline log line goes through [`LOG_BROADCASTER`]: it is printed to
//! stdout and fanned out to connected `/api/logs` clients. Dispatch progress
//! rides on the same channel as entries carrying a [`ProgressEvent`].

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::dispatch::{BatchProgress, DispatchResult};

/// Capacity of the broadcast channel; slow SSE clients skip older entries.
const CHANNEL_CAPACITY: usize = 256;

/// Log level for frontend display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Per-recipient progress of a running batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Batch this update belongs to
    pub batch_id: String,
    pub completed_count: usize,
    pub total_count: usize,
    pub recipient_address: String,
    pub succeeded: bool,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Nesting level for display
    #[serde(default)]
    pub indent: u8,
    /// Set on batch progress updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressEvent>,
}

impl LogEntry {
    fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            indent: 0,
            progress: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Progress line for one dispatched recipient.
    pub fn progress(batch_id: &str, progress: BatchProgress, result: &DispatchResult) -> Self {
        let (level, outcome) = if result.succeeded {
            (LogLevel::Success, "delivered".to_string())
        } else {
            (
                LogLevel::Error,
                format!(
                    "failed: {}",
                    result.error_detail.as_deref().unwrap_or("unknown error")
                ),
            )
        };

        let mut entry = Self::new(
            level,
            format!(
                "[{}/{}] {} {}",
                progress.completed_count, progress.total_count, result.recipient_address, outcome
            ),
        );
        entry.indent = 1;
        entry.progress = Some(ProgressEvent {
            batch_id: batch_id.to_string(),
            completed_count: progress.completed_count,
            total_count: progress.total_count,
            recipient_address: result.recipient_address.clone(),
            succeeded: result.succeeded,
        });
        entry
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }
}

/// Global log broadcaster
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

/// Broadcasts log entries to all connected SSE clients
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Print an entry and send it to all subscribers
    pub fn log(&self, entry: LogEntry) {
        let prefix = match entry.level {
            LogLevel::Info => "   ",
            LogLevel::Success => "   ✓",
            LogLevel::Warning => "   ⚠️",
            LogLevel::Error => "   ❌",
        };
        let indent = "   ".repeat(entry.indent as usize);
        println!("{}{} {}", indent, prefix, entry.message);

        // No receivers is fine
        let _ = self.sender.send(entry);
    }

    /// Get a receiver for SSE streaming
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub fn log_info(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::info(msg));
}

pub fn log_success(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::success(msg));
}

pub fn log_warning(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::warning(msg));
}

pub fn log_error(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::error(msg));
}

pub fn log_info_indent(msg: impl Into<String>, indent: u8) {
    LOG_BROADCASTER.log(LogEntry::info(msg).with_indent(indent));
}

pub fn log_batch_progress(batch_id: &str, progress: BatchProgress, result: &DispatchResult) {
    LOG_BROADCASTER.log(LogEntry::progress(batch_id, progress, result));
}
