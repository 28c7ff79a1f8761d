use std::collections::VecDeque;

use serde::Serialize;
use time::OffsetDateTime;

/// Entries kept before the tail is dropped.
pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime,
    pub message: String,
    pub level: LogLevel,
}

/// Operator-visible event log: the 100 most recent entries, newest first.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { entries: VecDeque::with_capacity(LOG_CAPACITY) }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        self.entries.push_front(LogEntry {
            timestamp: OffsetDateTime::now_utc(),
            message: message.into(),
            level,
        });
        self.entries.truncate(LOG_CAPACITY);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    /// Newest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_first() {
        let mut log = EventLog::new();
        log.info("first");
        log.error("second");
        let msgs: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(msgs, ["second", "first"]);
        assert_eq!(log.entries().next().unwrap().level, LogLevel::Error);
    }

    #[test]
    fn tail_dropped_past_capacity() {
        let mut log = EventLog::new();
        for i in 0..(LOG_CAPACITY + 20) {
            log.info(format!("entry {}", i));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        // Oldest survivors are the ones after the dropped tail.
        assert_eq!(log.entries().last().unwrap().message, "entry 20");
        assert_eq!(log.entries().next().unwrap().message, format!("entry {}", LOG_CAPACITY + 19));
    }
}
