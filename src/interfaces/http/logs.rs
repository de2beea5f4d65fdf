use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

pub const MAX_LOG_ENTRIES: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

/// Recent request log lines shown on the page; the oldest entry is dropped past the cap
#[derive(Default)]
pub struct LogBuffer {
    entries: Mutex<Vec<LogEntry>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // a panicked writer leaves the vector intact
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, level: &str, source: &str, message: &str) -> LogEntry {
        let entry = LogEntry {
            time: Local::now().format("%H:%M:%S").to_string(),
            level: level.to_string(),
            source: source.to_string(),
            message: message.to_string(),
        };
        let mut entries = self.lock();
        entries.push(entry.clone());
        if entries.len() > MAX_LOG_ENTRIES {
            let overflow = entries.len() - MAX_LOG_ENTRIES;
            entries.drain(..overflow);
        }
        entry
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }
}

/// Record a line in the buffer and mirror it to tracing
pub fn add_log(logs: &LogBuffer, level: &str, source: &str, message: &str) {
    match level {
        "ERROR" => tracing::error!(source, "{}", message),
        "WARN" => tracing::warn!(source, "{}", message),
        _ => tracing::info!(source, "{}", message),
    }
    logs.push(level, source, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_drops_oldest() {
        let logs = LogBuffer::new();
        for i in 0..(MAX_LOG_ENTRIES + 5) {
            add_log(&logs, "INFO", "test", &format!("line {}", i));
        }
        let entries = logs.snapshot();
        assert_eq!(entries.len(), MAX_LOG_ENTRIES);
        assert_eq!(entries[0].message, "line 5");
        assert_eq!(entries.last().unwrap().message, "line 104");
    }

    #[test]
    fn test_entry_fields() {
        let logs = LogBuffer::new();
        let entry = logs.push("WARN", "HttpApi", "slow query");
        assert_eq!(entry.level, "WARN");
        assert_eq!(entry.source, "HttpApi");
        assert_eq!(entry.time.len(), 8);
    }
}
