//! Real-time engine logs via Server-Sent Events (SSE).
//!
//! Every entry is emitted through `tracing` (so `RUST_LOG` filtering and the
//! process log keep working) and broadcast to connected `/api/logs` clients.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Log level for client display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Component that produced the entry (`watcher`, `engine`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
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
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Emit `entry` through tracing and to all subscribers
    pub fn log(&self, entry: LogEntry) {
        let target = entry.target.as_deref().unwrap_or("dietdata");
        match entry.level {
            LogLevel::Info => tracing::info!(component = target, "{}", entry.message),
            LogLevel::Success => tracing::info!(component = target, success = true, "{}", entry.message),
            LogLevel::Warning => tracing::warn!(component = target, "{}", entry.message),
            LogLevel::Error => tracing::error!(component = target, "{}", entry.message),
        }

        // No receivers is fine
        let _ = self.sender.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub fn log_info(target: &str, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Info, msg).with_target(target));
}

pub fn log_success(target: &str, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Success, msg).with_target(target));
}

pub fn log_warning(target: &str, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Warning, msg).with_target(target));
}

pub fn log_error(target: &str, msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Error, msg).with_target(target));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_entries() {
        let broadcaster = LogBroadcaster::new();
        let mut rx = broadcaster.subscribe();

        broadcaster.log(LogEntry::new(LogLevel::Warning, "source missing").with_target("watcher"));

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.level, LogLevel::Warning);
        assert_eq!(entry.message, "source missing");
        assert_eq!(entry.target.as_deref(), Some("watcher"));
    }

    #[test]
    fn test_log_without_subscribers() {
        LogBroadcaster::new().log(LogEntry::new(LogLevel::Info, "nobody listening"));
    }

    #[test]
    fn test_entry_json() {
        let json = serde_json::to_value(LogEntry::new(LogLevel::Success, "ok")).unwrap();
        assert_eq!(json["level"], "success");
        assert!(json.get("target").is_none());
    }
}
